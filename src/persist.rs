use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::PersistError;
use crate::models::{Article, ArticleImages, ArticleStatus, Language, ParsedArticle};
use crate::parser::summarize;
use crate::store;

const EXCERPT_CHARS: usize = 200;

/// Everything needed to create an article row.
pub struct NewArticle<'a> {
    pub parsed: &'a ParsedArticle,
    pub slug: String,
    pub language: Language,
    pub author_id: &'a str,
    pub images: ArticleImages,
    pub status: ArticleStatus,
}

pub struct ArticlePersister {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl ArticlePersister {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub async fn create(&self, new: NewArticle<'_>) -> Result<Article, PersistError> {
        let now = self.clock.now();
        let body = interleave_images(&new.parsed.body, &new.parsed.title, &new.images.content_images);
        let body_html = markdown_to_html(&body);
        let excerpt = excerpt_from_html(&body_html);

        let article = Article {
            id: Uuid::new_v4().to_string(),
            title: new.parsed.title.clone(),
            slug: new.slug,
            body,
            body_html,
            excerpt,
            seo: new.parsed.seo.clone(),
            language: new.language,
            status: new.status,
            cover_image: new.images.cover_image,
            content_images: new.images.content_images,
            created_by: new.author_id.to_string(),
            created_at: now,
            published_at: (new.status == ArticleStatus::Published).then_some(now),
        };

        match store::insert_article(&self.pool, &article).await {
            Ok(()) => {
                debug!(id = %article.id, slug = %article.slug, status = article.status.as_str(), "article stored");
                Ok(article)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                warn!(slug = %article.slug, "slug collision while storing article");
                Err(PersistError::DuplicateSlug(article.slug))
            }
            Err(e) => Err(PersistError::Storage(e)),
        }
    }
}

/// Spread inline images evenly between the body's paragraphs.
fn interleave_images(body: &str, alt: &str, images: &[String]) -> String {
    if images.is_empty() {
        return body.to_string();
    }

    let blocks: Vec<&str> = body.split("\n\n").filter(|b| !b.trim().is_empty()).collect();
    let step = (blocks.len() / (images.len() + 1)).max(1);
    let alt = alt.replace(['[', ']'], "");

    let mut out = Vec::with_capacity(blocks.len() + images.len());
    let mut remaining = images.iter();
    for (i, block) in blocks.iter().enumerate() {
        out.push(block.to_string());
        if (i + 1) % step == 0
            && i + 1 < blocks.len()
            && let Some(url) = remaining.next()
        {
            out.push(format!("![{alt}]({url})"));
        }
    }
    // Short bodies: whatever did not fit goes at the end
    out.extend(remaining.map(|url| format!("![{alt}]({url})")));
    out.join("\n\n")
}

fn markdown_to_html(markdown: &str) -> String {
    let parser = pulldown_cmark::Parser::new(markdown);
    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

fn excerpt_from_html(html: &str) -> String {
    let text = html2text::from_read(html.as_bytes(), 10_000).unwrap_or_else(|_| html.to_string());
    summarize(&text, EXCERPT_CHARS)
}
