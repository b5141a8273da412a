//! Best-effort "article published" messages over a WhatsApp gateway.

use std::sync::Arc;
use std::time::Duration;

use futures_core::future::BoxFuture;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{SiteConfig, WhatsAppConfig};
use crate::error::NotifyError;
use crate::models::{Article, Language};

pub trait NotificationTransport: Send + Sync {
    fn send_message<'a>(&'a self, number: &'a str, text: &'a str) -> BoxFuture<'a, Result<(), NotifyError>>;

    fn send_media_message<'a>(
        &'a self,
        number: &'a str,
        media_url: &'a str,
        caption: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>>;
}

/// Outcome of one recipient's delivery.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub recipient: String,
    pub delivered: bool,
    pub with_media: bool,
    pub error: Option<String>,
}

pub struct NotificationDispatcher {
    transport: Arc<dyn NotificationTransport>,
    site: SiteConfig,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn NotificationTransport>, site: SiteConfig) -> Self {
        Self { transport, site }
    }

    /// Send one message per recipient. A failed recipient never stops the rest
    /// and nothing here is an error for the caller.
    pub async fn notify(&self, article: &Article, recipients: &[String], locale: Language) -> Vec<DeliveryReport> {
        let text = self.message_text(article, locale);
        let media = article.cover_image.as_deref().and_then(|c| self.absolute_url(c));

        let mut reports = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let number: String = recipient.chars().filter(|c| !c.is_whitespace()).collect();
            if number.is_empty() {
                continue;
            }

            let result = match media.as_deref() {
                Some(url) => self.transport.send_media_message(&number, url, &text).await,
                None => self.transport.send_message(&number, &text).await,
            };

            match result {
                Ok(()) => {
                    debug!(recipient = %number, slug = %article.slug, "notification sent");
                    reports.push(DeliveryReport {
                        recipient: number,
                        delivered: true,
                        with_media: media.is_some(),
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(recipient = %number, error = %e, "notification failed");
                    reports.push(DeliveryReport {
                        recipient: number,
                        delivered: false,
                        with_media: media.is_some(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let delivered = reports.iter().filter(|r| r.delivered).count();
        info!(slug = %article.slug, delivered, total = reports.len(), "notifications dispatched");
        reports
    }

    pub fn article_url(&self, article: &Article) -> String {
        format!("{}/articles/{}", self.site.base_url.trim_end_matches('/'), article.slug)
    }

    fn absolute_url(&self, path: &str) -> Option<String> {
        let path = path.trim();
        if path.starts_with("http://") || path.starts_with("https://") {
            return Some(path.to_string());
        }
        if path.is_empty() || !self.site.base_url.starts_with("http") {
            return None;
        }
        Some(format!(
            "{}/{}",
            self.site.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }

    fn message_text(&self, article: &Article, locale: Language) -> String {
        let url = self.article_url(article);
        let excerpt = article.excerpt.trim();
        let (heading, read_more) = match locale {
            Language::Ar => ("📰 مقال جديد", "اقرأ المقال كاملاً"),
            Language::En => ("📰 New article", "Read the full article"),
        };

        let mut text = format!("{heading}\n\n*{}*", article.title);
        if !excerpt.is_empty() {
            text.push_str("\n\n");
            text.push_str(excerpt);
        }
        text.push_str(&format!("\n\n{read_more}: {url}"));
        text
    }
}

#[derive(Debug, Serialize)]
struct TextPayload<'a> {
    phone: &'a str,
    message: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaPayload<'a> {
    phone: &'a str,
    media_url: &'a str,
    caption: &'a str,
}

/// HTTP gateway exposing `send-message` and `send-media`.
pub struct WhatsAppGateway {
    config: WhatsAppConfig,
    client: Client,
}

impl WhatsAppGateway {
    pub fn new(config: WhatsAppConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    async fn post<T: Serialize>(&self, path: &str, number: &str, payload: &T) -> Result<(), NotifyError> {
        let endpoint = self.config.endpoint.as_deref().ok_or(NotifyError::NotConfigured)?;
        let url = format!("{}/{path}", endpoint.trim_end_matches('/'));

        let mut builder = self.client.post(&url).json(payload);
        if let Some(ref token) = self.config.token {
            builder = builder.bearer_auth(token);
        }

        let send_error = |message: String| NotifyError::Send {
            recipient: number.to_string(),
            message,
        };
        let response = builder.send().await.map_err(|e| send_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(send_error(format!(
                "HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        Ok(())
    }
}

impl NotificationTransport for WhatsAppGateway {
    fn send_message<'a>(&'a self, number: &'a str, text: &'a str) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            self.post("send-message", number, &TextPayload { phone: number, message: text })
                .await
        })
    }

    fn send_media_message<'a>(
        &'a self,
        number: &'a str,
        media_url: &'a str,
        caption: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            let payload = MediaPayload {
                phone: number,
                media_url,
                caption,
            };
            self.post("send-media", number, &payload).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTransport, sample_article};

    fn site() -> SiteConfig {
        SiteConfig {
            name: "Example".to_string(),
            description: String::new(),
            base_url: "https://example.com/".to_string(),
        }
    }

    #[tokio::test]
    async fn one_failing_recipient_does_not_stop_the_rest() {
        let transport = Arc::new(FakeTransport::failing_for(&["222"]));
        let dispatcher = NotificationDispatcher::new(transport.clone(), site());
        let article = sample_article("hello-world", None);

        let recipients = vec!["111".to_string(), "222".to_string(), " 333 ".to_string(), "  ".to_string()];
        let reports = dispatcher.notify(&article, &recipients, Language::En).await;

        assert_eq!(reports.len(), 3);
        assert!(reports[0].delivered);
        assert!(!reports[1].delivered);
        assert!(reports[1].error.is_some());
        assert!(reports[2].delivered);
        assert_eq!(reports[2].recipient, "333");

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].number, "333");
        assert!(sent.iter().all(|m| m.media_url.is_none()));
        assert!(sent[0].text.contains("https://example.com/articles/hello-world"));
        assert!(sent[0].text.contains("New article"));
    }

    #[tokio::test]
    async fn cover_image_is_sent_as_media() {
        let transport = Arc::new(FakeTransport::default());
        let dispatcher = NotificationDispatcher::new(transport.clone(), site());

        let remote = sample_article("a", Some("https://img.test/cover.jpg"));
        dispatcher.notify(&remote, &["111".to_string()], Language::Ar).await;
        let relative = sample_article("b", Some("/uploads/cover.jpg"));
        dispatcher.notify(&relative, &["111".to_string()], Language::Ar).await;

        let sent = transport.sent();
        assert_eq!(sent[0].media_url.as_deref(), Some("https://img.test/cover.jpg"));
        assert_eq!(sent[1].media_url.as_deref(), Some("https://example.com/uploads/cover.jpg"));
        assert!(sent[0].text.contains("مقال جديد"));
    }

    #[tokio::test]
    async fn unconfigured_gateway_reports_not_configured() {
        let gateway = WhatsAppGateway::new(WhatsAppConfig::default());
        let err = gateway.send_message("111", "hi").await.unwrap_err();
        assert!(matches!(err, NotifyError::NotConfigured));
    }
}
