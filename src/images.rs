use std::sync::Arc;
use std::time::Duration;

use futures_core::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::ImagesConfig;
use crate::error::ImageError;
use crate::models::{ArticleImages, Language, Settings};

/// Keyword-driven image search.
pub trait ImageProvider: Send + Sync {
    fn search<'a>(
        &'a self,
        query: &'a str,
        locale: Language,
        count: usize,
    ) -> BoxFuture<'a, Result<Vec<String>, ImageError>>;
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub include_images: bool,
    pub include_cover_image: bool,
    pub keywords: Vec<String>,
    pub locale: Language,
}

impl ImageRequest {
    /// Pick search keywords: explicit image keywords, then the generated SEO
    /// keywords, then the target keywords, then the title itself.
    pub fn for_article(settings: &Settings, seo_keywords: &[String], title: &str) -> Self {
        let pick = |list: &[String]| -> Vec<String> {
            list.iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect()
        };

        let keywords = [
            pick(&settings.image_search_keywords),
            pick(seo_keywords),
            pick(&settings.target_keywords),
        ]
        .into_iter()
        .find(|list| !list.is_empty())
        .unwrap_or_else(|| vec![title.trim().to_string()]);

        Self {
            include_images: settings.include_images,
            include_cover_image: settings.include_cover_image,
            keywords,
            locale: settings.language,
        }
    }
}

pub struct ImageSourcingService {
    provider: Arc<dyn ImageProvider>,
    inline_count: usize,
}

impl ImageSourcingService {
    pub fn new(provider: Arc<dyn ImageProvider>, inline_count: usize) -> Self {
        Self { provider, inline_count }
    }

    /// Find a cover and inline images. Callers treat any error as "no images".
    pub async fn fetch(&self, request: &ImageRequest) -> Result<ArticleImages, ImageError> {
        if !request.include_images && !request.include_cover_image {
            return Ok(ArticleImages::default());
        }

        let query = request.keywords.iter().take(3).cloned().collect::<Vec<_>>().join(" ");
        let wanted = usize::from(request.include_cover_image) + if request.include_images { self.inline_count } else { 0 };
        if query.is_empty() || wanted == 0 {
            return Ok(ArticleImages::default());
        }

        let mut urls = self.provider.search(&query, request.locale, wanted).await?;
        let mut seen = std::collections::HashSet::new();
        urls.retain(|u| seen.insert(u.clone()));

        let mut urls = urls.into_iter();
        let cover_image = if request.include_cover_image { urls.next() } else { None };
        let content_images = if request.include_images {
            urls.take(self.inline_count).collect()
        } else {
            Vec::new()
        };

        debug!(
            query = %query,
            cover = cover_image.is_some(),
            inline = content_images.len(),
            "images sourced"
        );
        Ok(ArticleImages {
            cover_image,
            content_images,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    urls: PhotoUrls,
}

#[derive(Debug, Deserialize)]
struct PhotoUrls {
    regular: String,
}

/// Unsplash photo search.
pub struct UnsplashProvider {
    config: ImagesConfig,
    client: Client,
}

impl UnsplashProvider {
    pub fn new(config: ImagesConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }
}

impl ImageProvider for UnsplashProvider {
    fn search<'a>(
        &'a self,
        query: &'a str,
        locale: Language,
        count: usize,
    ) -> BoxFuture<'a, Result<Vec<String>, ImageError>> {
        Box::pin(async move {
            let key = self.config.access_key.as_deref().ok_or(ImageError::NotConfigured)?;
            let url = format!("{}/search/photos", self.config.endpoint.trim_end_matches('/'));
            let per_page = count.clamp(1, 30).to_string();

            info!(query = %query, count, "searching images");
            let response = self
                .client
                .get(&url)
                .header("Authorization", format!("Client-ID {key}"))
                .header("Accept-Version", "v1")
                .query(&[
                    ("query", query),
                    ("per_page", per_page.as_str()),
                    ("orientation", "landscape"),
                    ("content_filter", "high"),
                    ("lang", locale.as_str()),
                ])
                .send()
                .await
                .map_err(|e| ImageError::Search(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(ImageError::Search(format!("HTTP {status}")));
            }

            let body: SearchResponse = response.json().await.map_err(|e| ImageError::Search(e.to_string()))?;
            Ok(body.results.into_iter().map(|p| p.urls.regular).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeImages;

    fn settings() -> Settings {
        Settings {
            target_keywords: vec!["target".to_string()],
            ..Settings::default()
        }
    }

    #[test]
    fn keyword_fallback_order() {
        let mut s = settings();
        s.image_search_keywords = vec!["explicit".to_string()];
        let seo = vec!["seo".to_string()];
        assert_eq!(ImageRequest::for_article(&s, &seo, "T").keywords, vec!["explicit"]);

        s.image_search_keywords = vec![" ".to_string()];
        assert_eq!(ImageRequest::for_article(&s, &seo, "T").keywords, vec!["seo"]);
        assert_eq!(ImageRequest::for_article(&s, &[], "T").keywords, vec!["target"]);

        s.target_keywords.clear();
        assert_eq!(ImageRequest::for_article(&s, &[], "Title").keywords, vec!["Title"]);
    }

    #[tokio::test]
    async fn cover_and_inline_images_are_split() {
        let provider = Arc::new(FakeImages::ok());
        let service = ImageSourcingService::new(provider.clone(), 2);
        let request = ImageRequest::for_article(&settings(), &[], "T");

        let images = service.fetch(&request).await.unwrap();
        assert_eq!(images.cover_image.as_deref(), Some("https://img.test/target/0.jpg"));
        assert_eq!(
            images.content_images,
            vec!["https://img.test/target/1.jpg", "https://img.test/target/2.jpg"]
        );
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn disabled_images_skip_the_provider() {
        let provider = Arc::new(FakeImages::ok());
        let service = ImageSourcingService::new(provider.clone(), 2);
        let mut s = settings();
        s.include_images = false;
        s.include_cover_image = false;

        let images = service.fetch(&ImageRequest::for_article(&s, &[], "T")).await.unwrap();
        assert_eq!(images, ArticleImages::default());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn provider_errors_are_returned_not_swallowed() {
        let service = ImageSourcingService::new(Arc::new(FakeImages::failing()), 2);
        let result = service.fetch(&ImageRequest::for_article(&settings(), &[], "T")).await;
        assert!(matches!(result, Err(ImageError::Search(_))));
    }
}
