use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SiteConfig;
use crate::error::PipelineError;
use crate::images::{ImageRequest, ImageSourcingService};
use crate::llm::ContentGenerator;
use crate::models::{Article, ArticleImages, ArticleStatus, ParsedArticle, Settings};
use crate::parser;
use crate::persist::{ArticlePersister, NewArticle};
use crate::prompt;
use crate::slug::SlugAllocator;

/// Everything one slot needs to turn a title into a stored article.
pub struct SlotPipeline {
    generator: Arc<dyn ContentGenerator>,
    images: ImageSourcingService,
    persister: ArticlePersister,
    slugs: SlugAllocator,
    site: SiteConfig,
    author_id: String,
}

impl SlotPipeline {
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        images: ImageSourcingService,
        persister: ArticlePersister,
        slugs: SlugAllocator,
        site: SiteConfig,
        author_id: String,
    ) -> Self {
        Self {
            generator,
            images,
            persister,
            slugs,
            site,
            author_id,
        }
    }

    pub fn prompt(&self, settings: &Settings, title: &str) -> String {
        prompt::build_request(settings, title, &self.site.name, &self.site.description)
    }

    /// Generate and parse a draft for an already rendered prompt.
    pub async fn draft(&self, prompt: &str) -> Result<ParsedArticle, PipelineError> {
        let raw = self.generator.generate(prompt).await?;
        let parsed = parser::parse(raw)?;
        debug!(title = %parsed.title, body_chars = parsed.body.chars().count(), "draft parsed");
        Ok(parsed)
    }

    /// Give a parsed draft a slug and images, then store it.
    pub async fn store(
        &self,
        settings: &Settings,
        parsed: &ParsedArticle,
        status: ArticleStatus,
    ) -> Result<Article, PipelineError> {
        let slug = self.slugs.allocate(&parsed.title, settings.language);

        let request = ImageRequest::for_article(settings, &parsed.seo.keywords, &parsed.title);
        let images = match self.images.fetch(&request).await {
            Ok(images) => images,
            Err(e) => {
                warn!(slug = %slug, error = %e, "image sourcing failed, continuing without images");
                ArticleImages::default()
            }
        };

        let article = self
            .persister
            .create(NewArticle {
                parsed,
                slug,
                language: settings.language,
                author_id: &self.author_id,
                images,
                status,
            })
            .await?;
        Ok(article)
    }

    /// Render, generate, parse, then store: the full path for one title.
    pub async fn produce(&self, settings: &Settings, title: &str) -> Result<Article, PipelineError> {
        let status = if settings.auto_publish {
            ArticleStatus::Published
        } else {
            ArticleStatus::Draft
        };

        let prompt = self.prompt(settings, title);
        let parsed = self.draft(&prompt).await?;
        let article = self.store(settings, &parsed, status).await?;

        info!(
            title = %article.title,
            slug = %article.slug,
            status = article.status.as_str(),
            cover = article.cover_image.is_some(),
            "article produced"
        );
        Ok(article)
    }
}
