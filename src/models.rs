use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::LedgerError;

/// Failed jobs may be retried until they have failed this many times.
pub const MAX_ATTEMPTS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Ar,
    En,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Ar => "ar",
            Language::En => "en",
        }
    }

    /// Human-readable name used inside prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Ar => "Arabic",
            Language::En => "English",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ArticleStatus {
    Draft,
    Published,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Draft => "draft",
            ArticleStatus::Published => "published",
        }
    }
}

/// The generation settings singleton.
///
/// Counters and the title pool are owned by the scheduler, so they are never
/// taken from an imported or submitted settings document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub prompt_template: String,
    pub number_of_paragraphs: u32,
    pub average_words_per_paragraph: u32,
    pub target_keywords: Vec<String>,
    pub language: Language,

    pub include_images: bool,
    pub include_cover_image: bool,
    pub image_search_keywords: Vec<String>,

    pub auto_publish: bool,

    pub total_articles_needed: u32,
    pub articles_per_day: u32,
    pub start_date: Option<NaiveDate>,
    #[serde(with = "hh_mm")]
    pub generation_time: NaiveTime,
    pub is_active: bool,

    pub whatsapp_notification_numbers: Vec<String>,
    pub notify_on_completion: bool,

    #[serde(skip_deserializing)]
    pub ready_titles: Vec<ReadyTitle>,
    #[serde(skip_deserializing)]
    pub articles_generated: u32,
    #[serde(skip_deserializing)]
    pub last_generated_at: Option<DateTime<Utc>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            prompt_template: String::new(),
            number_of_paragraphs: 5,
            average_words_per_paragraph: 120,
            target_keywords: Vec::new(),
            language: Language::Ar,
            include_images: true,
            include_cover_image: true,
            image_search_keywords: Vec::new(),
            auto_publish: false,
            total_articles_needed: 0,
            articles_per_day: 1,
            start_date: None,
            generation_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            is_active: false,
            whatsapp_notification_numbers: Vec::new(),
            notify_on_completion: false,
            ready_titles: Vec::new(),
            articles_generated: 0,
            last_generated_at: None,
        }
    }
}

impl Settings {
    pub fn remaining(&self) -> u32 {
        self.total_articles_needed.saturating_sub(self.articles_generated)
    }

    pub fn unused_titles(&self) -> usize {
        self.ready_titles.iter().filter(|t| !t.used).count()
    }
}

/// `"HH:MM"` (de)serialization for the daily generation time.
mod hh_mm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(d)?;
        NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(serde::de::Error::custom)
    }
}

/// Settings as stored: list fields are JSON arrays, times are text.
#[derive(Debug, Clone, FromRow)]
pub struct SettingsRow {
    pub prompt_template: String,
    pub number_of_paragraphs: i64,
    pub average_words_per_paragraph: i64,
    pub target_keywords: String,
    pub language: Language,
    pub include_images: bool,
    pub include_cover_image: bool,
    pub image_search_keywords: String,
    pub auto_publish: bool,
    pub total_articles_needed: i64,
    pub articles_per_day: i64,
    pub start_date: Option<String>,
    pub generation_time: String,
    pub is_active: bool,
    pub whatsapp_notification_numbers: String,
    pub notify_on_completion: bool,
    pub articles_generated: i64,
    pub last_generated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ReadyTitle {
    pub id: String,
    pub title: String,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub article_id: Option<String>,
}

/// One generation attempt for one title.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Job {
    pub id: String,
    pub title_id: String,
    pub title: String,
    pub status: JobStatus,
    pub scheduled_for: DateTime<Utc>,
    pub attempts: i64,
    pub article_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of asking a failed job to run again.
#[derive(Debug)]
pub enum RetryOutcome {
    Requeued(Job),
    Exhausted(Job),
}

impl Job {
    pub fn new(title: &ReadyTitle, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title_id: title.id.clone(),
            title: title.title.clone(),
            status: JobStatus::Pending,
            scheduled_for: now,
            attempts: 0,
            article_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(mut self, allowed: &[JobStatus], to: JobStatus, now: DateTime<Utc>) -> Result<Job, LedgerError> {
        if !allowed.contains(&self.status) {
            return Err(LedgerError::InvalidTransition {
                id: self.id,
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(self)
    }

    pub fn start(self, now: DateTime<Utc>) -> Result<Job, LedgerError> {
        self.transition(&[JobStatus::Pending], JobStatus::Processing, now)
    }

    pub fn complete(self, article_id: &str, now: DateTime<Utc>) -> Result<Job, LedgerError> {
        let mut job = self.transition(&[JobStatus::Processing], JobStatus::Completed, now)?;
        job.article_id = Some(article_id.to_string());
        job.failure_reason = None;
        Ok(job)
    }

    pub fn fail(self, reason: &str, now: DateTime<Utc>) -> Result<Job, LedgerError> {
        let mut job = self.transition(&[JobStatus::Pending, JobStatus::Processing], JobStatus::Failed, now)?;
        job.attempts += 1;
        job.failure_reason = Some(reason.to_string());
        Ok(job)
    }

    /// Give up on a processing job without charging an attempt, e.g. when the
    /// campaign filled up while it ran.
    pub fn abandon(self, reason: &str, now: DateTime<Utc>) -> Result<Job, LedgerError> {
        let mut job = self.transition(&[JobStatus::Processing], JobStatus::Cancelled, now)?;
        job.article_id = None;
        job.failure_reason = Some(reason.to_string());
        Ok(job)
    }

    /// Only failed jobs can be retried; a job that has used up its attempts
    /// comes back unchanged as `Exhausted`.
    pub fn retry(self, now: DateTime<Utc>) -> Result<RetryOutcome, LedgerError> {
        if self.status != JobStatus::Failed {
            return Err(LedgerError::InvalidTransition {
                id: self.id,
                from: self.status.to_string(),
                to: JobStatus::Pending.to_string(),
            });
        }
        if self.attempts >= MAX_ATTEMPTS {
            return Ok(RetryOutcome::Exhausted(self));
        }
        let mut job = self;
        job.status = JobStatus::Pending;
        job.scheduled_for = now;
        job.updated_at = now;
        Ok(RetryOutcome::Requeued(job))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Seo {
    pub meta_title: String,
    pub meta_description: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ArticleImages {
    pub cover_image: Option<String>,
    pub content_images: Vec<String>,
}

/// Provider output before validation.
#[derive(Debug, Clone, Default)]
pub struct RawDraft {
    pub title: Option<String>,
    pub body: Option<String>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub keywords: Vec<String>,
}

/// Validated, normalized article content.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedArticle {
    pub title: String,
    pub body: String,
    pub seo: Seo,
}

#[derive(Debug, Clone, Serialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub body: String,
    pub body_html: String,
    pub excerpt: String,
    pub seo: Seo,
    pub language: Language,
    pub status: ArticleStatus,
    pub cover_image: Option<String>,
    pub content_images: Vec<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Read model for articles from DB.
#[derive(Debug, Clone, FromRow)]
pub struct ArticleRow {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub body: String,
    pub body_html: String,
    pub excerpt: String,
    pub meta_title: String,
    pub meta_description: String,
    pub keywords: String,
    pub language: Language,
    pub status: ArticleStatus,
    pub cover_image: Option<String>,
    pub content_images: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            slug: row.slug,
            body: row.body,
            body_html: row.body_html,
            excerpt: row.excerpt,
            seo: Seo {
                meta_title: row.meta_title,
                meta_description: row.meta_description,
                keywords: serde_json::from_str(&row.keywords).unwrap_or_default(),
            },
            language: row.language,
            status: row.status,
            cover_image: row.cover_image,
            content_images: serde_json::from_str(&row.content_images).unwrap_or_default(),
            created_by: row.created_by,
            created_at: row.created_at,
            published_at: row.published_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_job(attempts: i64) -> Job {
        let title = ReadyTitle {
            id: "t1".to_string(),
            title: "A".to_string(),
            used: false,
            used_at: None,
            article_id: None,
        };
        let mut job = Job::new(&title, Utc::now());
        job.status = JobStatus::Failed;
        job.attempts = attempts;
        job
    }

    #[test]
    fn retry_requeues_below_max_attempts() {
        let job = failed_job(MAX_ATTEMPTS - 1);
        match job.retry(Utc::now()).unwrap() {
            RetryOutcome::Requeued(job) => assert_eq!(job.status, JobStatus::Pending),
            RetryOutcome::Exhausted(_) => panic!("expected requeue"),
        }
    }

    #[test]
    fn retry_refused_at_max_attempts() {
        let job = failed_job(MAX_ATTEMPTS);
        match job.retry(Utc::now()).unwrap() {
            RetryOutcome::Exhausted(job) => {
                assert_eq!(job.status, JobStatus::Failed);
                assert_eq!(job.attempts, MAX_ATTEMPTS);
            }
            RetryOutcome::Requeued(_) => panic!("expected exhaustion"),
        }
    }

    #[test]
    fn retry_of_non_failed_job_is_an_error() {
        let mut job = failed_job(0);
        job.status = JobStatus::Completed;
        assert!(matches!(
            job.retry(Utc::now()),
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn lifecycle_transitions() {
        let now = Utc::now();
        let mut job = failed_job(0);
        job.status = JobStatus::Pending;

        let job = job.start(now).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        let failed = job.clone().fail("boom", now).unwrap();
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.failure_reason.as_deref(), Some("boom"));

        let done = job.complete("art-1", now).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.article_id.as_deref(), Some("art-1"));
        assert!(done.start(now).is_err());
    }

    #[test]
    fn settings_document_ignores_counters() {
        let settings: Settings = toml::from_str(
            r#"
            language = "en"
            total_articles_needed = 10
            generation_time = "07:30"
            articles_generated = 9
            "#,
        )
        .unwrap();
        assert_eq!(settings.language, Language::En);
        assert_eq!(settings.total_articles_needed, 10);
        assert_eq!(settings.generation_time, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert_eq!(settings.articles_generated, 0);
        assert_eq!(settings.number_of_paragraphs, 5);
    }
}
