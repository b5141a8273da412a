//! Content generation over an OpenAI-compatible chat completions API.

use std::time::Duration;

use futures_core::future::BoxFuture;
use gray_matter::Matter;
use gray_matter::engine::YAML;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::models::RawDraft;

/// Turns a rendered prompt into a draft. One round trip, no retries:
/// retrying is the job ledger's decision.
pub trait ContentGenerator: Send + Sync {
    fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<RawDraft, GenerationError>>;
}

const SYSTEM_PROMPT: &str = "You are a professional bilingual (Arabic/English) content writer and SEO editor. \
You always answer with a single valid JSON object and no surrounding commentary.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct ChatCompletionsClient {
    config: GenerationConfig,
    timeout: Duration,
    client: Client,
}

impl ChatCompletionsClient {
    pub fn new(config: GenerationConfig, timeout: Duration) -> Self {
        Self {
            config,
            timeout,
            client: Client::new(),
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'));
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Provider(format!(
                "HTTP {status}: {}",
                body.chars().take(500).collect::<String>()
            )));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| self.classify(e))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(GenerationError::Provider("empty completion".to_string()));
        }
        Ok(content)
    }

    fn classify(&self, e: reqwest::Error) -> GenerationError {
        if e.is_timeout() {
            GenerationError::Timeout(humantime::format_duration(self.timeout).to_string())
        } else {
            GenerationError::Provider(e.to_string())
        }
    }
}

impl ContentGenerator for ChatCompletionsClient {
    fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<RawDraft, GenerationError>> {
        Box::pin(async move {
            info!(model = %self.config.model, prompt_chars = prompt.chars().count(), "requesting article generation");

            let content = match tokio::time::timeout(self.timeout, self.complete(prompt)).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(timeout = ?self.timeout, "generation request timed out");
                    return Err(GenerationError::Timeout(
                        humantime::format_duration(self.timeout).to_string(),
                    ));
                }
            };

            debug!(chars = content.len(), "generation response received");
            Ok(decode_completion(&content))
        })
    }
}

/// Decode completion text into a draft, accepting the shapes models actually
/// return: a JSON object (possibly fenced or wrapped in prose), Markdown with
/// YAML frontmatter, or bare Markdown whose first `# ` heading is the title.
pub fn decode_completion(content: &str) -> RawDraft {
    if let Some(draft) = decode_json(content) {
        return draft;
    }

    let matter = Matter::<YAML>::new();
    let result = matter.parse(content);
    let frontmatter = result.data.as_ref().and_then(|d| d.as_hashmap().ok());

    if let Some(fm) = frontmatter {
        let get = |key: &str| fm.get(key).and_then(|v| v.as_string().ok());
        let keywords = fm
            .get("keywords")
            .and_then(|v| v.as_vec().ok())
            .map(|vec| vec.into_iter().filter_map(|v| v.as_string().ok()).collect())
            .unwrap_or_default();
        return RawDraft {
            title: get("title").or_else(|| first_heading(&result.content)),
            body: Some(result.content),
            meta_title: get("metaTitle").or_else(|| get("meta_title")),
            meta_description: get("metaDescription").or_else(|| get("meta_description")),
            keywords,
        };
    }

    RawDraft {
        title: first_heading(content),
        body: Some(content.to_string()),
        ..RawDraft::default()
    }
}

fn decode_json(content: &str) -> Option<RawDraft> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(&content[start..=end]).ok()?;
    let obj = value.as_object()?;

    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
            .map(str::to_string)
    };

    let keywords = match obj.get("keywords") {
        Some(serde_json::Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        Some(serde_json::Value::String(s)) => s.split([',', '،']).map(str::to_string).collect(),
        _ => Vec::new(),
    };

    Some(RawDraft {
        title: text(&["title"]),
        body: text(&["content", "body", "article"]),
        meta_title: text(&["metaTitle", "meta_title", "seoTitle"]),
        meta_description: text(&["metaDescription", "meta_description", "description"]),
        keywords,
    })
}

fn first_heading(content: &str) -> Option<String> {
    content
        .lines()
        .find(|l| l.starts_with("# "))
        .map(|l| l.trim_start_matches("# ").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_fenced_json() {
        let content = "```json\n{\"title\": \"Hello\", \"content\": \"Body\", \"metaDescription\": \"Desc\", \
                       \"keywords\": [\"a\", \"b\"]}\n```";
        let draft = decode_completion(content);
        assert_eq!(draft.title.as_deref(), Some("Hello"));
        assert_eq!(draft.body.as_deref(), Some("Body"));
        assert_eq!(draft.meta_description.as_deref(), Some("Desc"));
        assert_eq!(draft.keywords, vec!["a", "b"]);
    }

    #[test]
    fn decodes_comma_separated_keywords() {
        let draft = decode_completion(r#"{"title": "T", "body": "B", "keywords": "تقنية، برمجة"}"#);
        assert_eq!(draft.keywords.len(), 2);
        assert_eq!(draft.body.as_deref(), Some("B"));
    }

    #[test]
    fn decodes_frontmatter_markdown() {
        let content = "---\ntitle: From Frontmatter\nkeywords:\n  - one\n  - two\n---\n\nParagraph text.\n";
        let draft = decode_completion(content);
        assert_eq!(draft.title.as_deref(), Some("From Frontmatter"));
        assert_eq!(draft.keywords, vec!["one", "two"]);
        assert!(draft.body.unwrap().contains("Paragraph text."));
    }

    #[test]
    fn falls_back_to_first_heading() {
        let draft = decode_completion("Intro line\n# The Heading\n\nText");
        assert_eq!(draft.title.as_deref(), Some("The Heading"));
        assert!(draft.meta_title.is_none());
    }
}
