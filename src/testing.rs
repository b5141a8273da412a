//! Fakes and fixtures shared by the unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use futures_core::future::BoxFuture;
use sqlx::SqlitePool;

use crate::clock::Clock;
use crate::config::{Config, parse_config};
use crate::error::{GenerationError, ImageError, NotifyError};
use crate::images::ImageProvider;
use crate::llm::ContentGenerator;
use crate::models::{Article, ArticleStatus, Language, RawDraft, Seo};
use crate::notify::NotificationTransport;
use crate::scheduler::{Providers, Scheduler};
use crate::{db, store};

/// A clock that only moves when told to.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Scripted generator: call `n` (1-based) fails when listed in `fail_on`, and
/// any prompt containing `fail_when` fails. Titles cycle through `titles` when
/// given.
#[derive(Default)]
pub struct FakeGenerator {
    fail_on: HashSet<usize>,
    fail_always: bool,
    fail_when: Option<String>,
    titles: Vec<String>,
    prompts: Mutex<Vec<String>>,
}

impl FakeGenerator {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            fail_on: calls.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_always: true,
            ..Self::default()
        }
    }

    pub fn failing_when_prompt_contains(needle: &str) -> Self {
        Self {
            fail_when: Some(needle.to_string()),
            ..Self::default()
        }
    }

    pub fn titled(titles: &[&str]) -> Self {
        Self {
            titles: titles.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl ContentGenerator for FakeGenerator {
    fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<RawDraft, GenerationError>> {
        Box::pin(async move {
            let call = {
                let mut prompts = self.prompts.lock().unwrap();
                prompts.push(prompt.to_string());
                prompts.len()
            };
            let refused = self.fail_when.as_deref().is_some_and(|needle| prompt.contains(needle));
            if self.fail_always || refused || self.fail_on.contains(&call) {
                return Err(GenerationError::Provider(format!("scripted failure on call {call}")));
            }
            let title = if self.titles.is_empty() {
                format!("Generated article {call}")
            } else {
                self.titles[(call - 1) % self.titles.len()].clone()
            };
            Ok(RawDraft {
                title: Some(title),
                body: Some("First paragraph of the article.\n\nSecond paragraph.\n\nThird paragraph.".to_string()),
                meta_title: Some(format!("Generated article {call}")),
                meta_description: Some("A generated article.".to_string()),
                keywords: vec!["alpha".to_string(), "beta".to_string()],
            })
        })
    }
}

/// Image provider returning `https://img.test/{query}/{i}.jpg`, or failing.
#[derive(Default)]
pub struct FakeImages {
    fail: bool,
    calls: Mutex<usize>,
}

impl FakeImages {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl ImageProvider for FakeImages {
    fn search<'a>(
        &'a self,
        query: &'a str,
        _locale: Language,
        count: usize,
    ) -> BoxFuture<'a, Result<Vec<String>, ImageError>> {
        Box::pin(async move {
            *self.calls.lock().unwrap() += 1;
            if self.fail {
                return Err(ImageError::Search("scripted image failure".to_string()));
            }
            let query = query.replace(' ', "+");
            Ok((0..count).map(|i| format!("https://img.test/{query}/{i}.jpg")).collect())
        })
    }
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub number: String,
    pub text: String,
    pub media_url: Option<String>,
}

/// Records every message; numbers in `failing` are rejected.
#[derive(Default)]
pub struct FakeTransport {
    failing: HashSet<String>,
    fail_all: bool,
    sent: Mutex<Vec<SentMessage>>,
}

impl FakeTransport {
    pub fn failing_for(numbers: &[&str]) -> Self {
        Self {
            failing: numbers.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, number: &str, text: &str, media_url: Option<&str>) -> Result<(), NotifyError> {
        if self.fail_all || self.failing.contains(number) {
            return Err(NotifyError::Send {
                recipient: number.to_string(),
                message: "scripted delivery failure".to_string(),
            });
        }
        self.sent.lock().unwrap().push(SentMessage {
            number: number.to_string(),
            text: text.to_string(),
            media_url: media_url.map(str::to_string),
        });
        Ok(())
    }
}

impl NotificationTransport for FakeTransport {
    fn send_message<'a>(&'a self, number: &'a str, text: &'a str) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move { self.record(number, text, None) })
    }

    fn send_media_message<'a>(
        &'a self,
        number: &'a str,
        media_url: &'a str,
        caption: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move { self.record(number, caption, Some(media_url)) })
    }
}

pub fn sample_article(slug: &str, cover_image: Option<&str>) -> Article {
    let now = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
    Article {
        id: uuid::Uuid::new_v4().to_string(),
        title: "Hello World".to_string(),
        slug: slug.to_string(),
        body: "Body.".to_string(),
        body_html: "<p>Body.</p>\n".to_string(),
        excerpt: "Body.".to_string(),
        seo: Seo::default(),
        language: Language::En,
        status: ArticleStatus::Published,
        cover_image: cover_image.map(str::to_string),
        content_images: Vec::new(),
        created_by: "test".to_string(),
        created_at: now,
        published_at: Some(now),
    }
}

/// Store a placeholder article and return its id.
pub async fn insert_article(pool: &SqlitePool, slug: &str) -> String {
    let article = sample_article(slug, None);
    store::insert_article(pool, &article).await.unwrap();
    article.id
}

pub fn test_config() -> Config {
    parse_config(
        r#"
[autoscribe]
timezone = "UTC"
author_id = "tester"

[site]
name = "Example"
description = "A test site"
base_url = "https://example.com"
"#,
    )
    .unwrap()
}

/// A scheduler over a fresh in-memory database with the given fakes.
pub struct Harness {
    pub scheduler: Arc<Scheduler>,
    pub pool: SqlitePool,
    pub clock: Arc<FixedClock>,
    pub generator: Arc<FakeGenerator>,
    pub images: Arc<FakeImages>,
    pub transport: Arc<FakeTransport>,
}

impl Harness {
    pub async fn new(generator: FakeGenerator, images: FakeImages, transport: FakeTransport) -> Self {
        let pool = db::create_memory_pool().await.unwrap();
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 10, 16, 10, 0, 0).unwrap()));
        let generator = Arc::new(generator);
        let images = Arc::new(images);
        let transport = Arc::new(transport);

        let providers = Providers {
            generator: generator.clone(),
            images: images.clone(),
            transport: transport.clone(),
            clock: clock.clone(),
        };
        let scheduler = Arc::new(Scheduler::new(pool.clone(), &test_config(), providers));

        Self {
            scheduler,
            pool,
            clock,
            generator,
            images,
            transport,
        }
    }

    /// Another scheduler over the same database and fakes, standing in for a
    /// second process.
    pub fn second_scheduler(&self) -> Scheduler {
        let providers = Providers {
            generator: self.generator.clone(),
            images: self.images.clone(),
            transport: self.transport.clone(),
            clock: self.clock.clone(),
        };
        Scheduler::new(self.pool.clone(), &test_config(), providers)
    }

    pub async fn ok() -> Self {
        Self::new(FakeGenerator::ok(), FakeImages::ok(), FakeTransport::default()).await
    }

    /// Save settings built by `edit` on top of an active English baseline.
    pub async fn configure(&self, edit: impl FnOnce(&mut crate::models::Settings)) {
        let mut settings = crate::models::Settings {
            language: Language::En,
            is_active: true,
            total_articles_needed: 10,
            articles_per_day: 2,
            ..Default::default()
        };
        edit(&mut settings);
        store::save_settings(&self.pool, &settings).await.unwrap();
    }

    pub async fn add_titles(&self, titles: &[&str]) {
        let titles: Vec<String> = titles.iter().map(|t| t.to_string()).collect();
        store::add_titles(&self.pool, &titles).await.unwrap();
    }
}
