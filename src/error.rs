use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation timed out after {0}")]
    Timeout(String),
    #[error("generation provider error: {0}")]
    Provider(String),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed generation output: {0}")]
    MalformedOutput(String),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("slug '{0}' already exists")]
    DuplicateSlug(String),
    #[error("storing article: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image provider not configured")]
    NotConfigured,
    #[error("image search failed: {0}")]
    Search(String),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification gateway not configured")]
    NotConfigured,
    #[error("sending to {recipient} failed: {message}")]
    Send { recipient: String, message: String },
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("title {0} is already used or claimed")]
    TitleAlreadyClaimed(String),
    #[error("job {id}: cannot go from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },
    #[error("job {0} not found")]
    NotFound(String),
    #[error("title {0} not found")]
    UnknownTitle(String),
    #[error("total article quota already reached")]
    QuotaReached,
}

/// Failure of a single slot's pipeline.
///
/// Everything except `Storage` is recorded on the job and the batch moves on;
/// `Storage` means the stores themselves are unreachable and aborts the batch.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("slug '{0}' already exists")]
    DuplicateSlug(String),
    #[error("storage: {0:#}")]
    Storage(anyhow::Error),
}

impl From<PersistError> for PipelineError {
    fn from(e: PersistError) -> Self {
        match e {
            PersistError::DuplicateSlug(slug) => PipelineError::DuplicateSlug(slug),
            PersistError::Storage(e) => PipelineError::Storage(e.into()),
        }
    }
}
