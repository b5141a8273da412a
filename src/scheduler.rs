use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{ConfigError, LedgerError, PipelineError};
use crate::images::{ImageProvider, ImageSourcingService, UnsplashProvider};
use crate::ledger::JobLedger;
use crate::llm::{ChatCompletionsClient, ContentGenerator};
use crate::models::{Article, ArticleStatus, Job, ParsedArticle, ReadyTitle, Settings};
use crate::notify::{NotificationDispatcher, NotificationTransport, WhatsAppGateway};
use crate::parser::dedup_keywords;
use crate::persist::ArticlePersister;
use crate::pipeline::SlotPipeline;
use crate::slug::SlugAllocator;
use crate::store;

/// Upper bound for a single manual batch.
pub const MAX_MANUAL_BATCH: u32 = 10;

const NO_TITLES_LEFT: &str = "no unused titles left";
const QUOTA_REACHED: &str = "total articles already generated";

/// The external services a scheduler talks to.
pub struct Providers {
    pub generator: Arc<dyn ContentGenerator>,
    pub images: Arc<dyn ImageProvider>,
    pub transport: Arc<dyn NotificationTransport>,
    pub clock: Arc<dyn Clock>,
}

impl Providers {
    pub fn from_config(config: &Config) -> Self {
        Self {
            generator: Arc::new(ChatCompletionsClient::new(
                config.generation.clone(),
                config.generation_timeout(),
            )),
            images: Arc::new(UnsplashProvider::new(config.images.clone())),
            transport: Arc::new(WhatsAppGateway::new(config.whatsapp.clone())),
            clock: Arc::new(SystemClock),
        }
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The daily schedule.
    Schedule,
    /// An operator asking for this many articles now.
    Manual(u32),
}

/// How many slots a run should attempt.
///
/// Scheduled runs only fire while active, on or after the start date and at or
/// after the local generation time, and never go past the daily quota. Manual
/// runs skip those gates. Both stop at what is left of the total.
pub fn due_count(settings: &Settings, trigger: Trigger, now: DateTime<Tz>, completed_today: u32) -> u32 {
    let remaining = settings.remaining();
    match trigger {
        Trigger::Manual(count) => count.clamp(1, MAX_MANUAL_BATCH).min(remaining),
        Trigger::Schedule => {
            if !settings.is_active {
                return 0;
            }
            if settings.start_date.is_some_and(|start| now.date_naive() < start) {
                return 0;
            }
            if now.time() < settings.generation_time {
                return 0;
            }
            settings.articles_per_day.saturating_sub(completed_today).min(remaining)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotReport {
    pub status: SlotStatus,
    pub job_id: Option<String>,
    pub title: Option<String>,
    pub article_id: Option<String>,
    pub failure_reason: Option<String>,
}

impl SlotReport {
    fn completed(job: &Job, article_id: &str) -> Self {
        Self {
            status: SlotStatus::Completed,
            job_id: Some(job.id.clone()),
            title: Some(job.title.clone()),
            article_id: Some(article_id.to_string()),
            failure_reason: None,
        }
    }

    fn failed(job: &Job, reason: String) -> Self {
        Self {
            status: SlotStatus::Failed,
            job_id: Some(job.id.clone()),
            title: Some(job.title.clone()),
            article_id: None,
            failure_reason: Some(reason),
        }
    }

    fn skipped(reason: &str) -> Self {
        Self {
            status: SlotStatus::Skipped,
            job_id: None,
            title: None,
            article_id: None,
            failure_reason: Some(reason.to_string()),
        }
    }

    fn abandoned(job: &Job, reason: &str) -> Self {
        Self {
            job_id: Some(job.id.clone()),
            title: Some(job.title.clone()),
            ..Self::skipped(reason)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationSummary {
    pub requested: u32,
    pub completed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub slots: Vec<SlotReport>,
}

impl GenerationSummary {
    fn new(requested: u32) -> Self {
        Self {
            requested,
            ..Self::default()
        }
    }

    fn record(&mut self, slot: SlotReport) {
        match slot.status {
            SlotStatus::Completed => self.completed += 1,
            SlotStatus::Failed => self.failed += 1,
            SlotStatus::Skipped => self.skipped += 1,
        }
        self.slots.push(slot);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Progress {
    pub configured: bool,
    pub generated: u32,
    pub total: u32,
    pub remaining: u32,
    pub progress_percentage: u32,
    pub completed_today: u32,
    pub due_now: u32,
    pub unused_titles: u32,
    pub is_active: bool,
    pub last_generated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptPreview {
    pub prompt: String,
    pub parsed: ParsedArticle,
    pub article: Option<Article>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResetReport {
    pub cancelled_jobs: u64,
    pub titles_reset: u64,
}

/// Owns the generation run and every operator action around it.
pub struct Scheduler {
    pool: SqlitePool,
    ledger: JobLedger,
    pipeline: SlotPipeline,
    dispatcher: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    tz: Tz,
    // Held for the whole of a run so two runs never interleave claims.
    run_lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(pool: SqlitePool, config: &Config, providers: Providers) -> Self {
        let Providers {
            generator,
            images,
            transport,
            clock,
        } = providers;

        let pipeline = SlotPipeline::new(
            generator,
            ImageSourcingService::new(images, config.images.inline_image_count),
            ArticlePersister::new(pool.clone(), clock.clone()),
            SlugAllocator::new(clock.clone()),
            config.site.clone(),
            config.autoscribe.author_id.clone(),
        );

        Self {
            ledger: JobLedger::new(pool.clone(), clock.clone()),
            dispatcher: NotificationDispatcher::new(transport, config.site.clone()),
            pipeline,
            pool,
            clock,
            tz: config.timezone(),
            run_lock: Mutex::new(()),
        }
    }

    /// Run whatever the schedule says is due right now.
    pub async fn run_due(&self) -> Result<Option<GenerationSummary>> {
        self.run(Trigger::Schedule).await
    }

    /// Generate up to `count` articles immediately. `None` when there are no
    /// generation settings yet.
    pub async fn generate_now(&self, count: u32) -> Result<Option<GenerationSummary>> {
        self.run(Trigger::Manual(count)).await
    }

    async fn run(&self, trigger: Trigger) -> Result<Option<GenerationSummary>> {
        let _running = self.run_lock.lock().await;

        let Some(settings) = store::get_settings(&self.pool).await? else {
            debug!("no generation settings, nothing to run");
            return Ok(None);
        };

        let now = self.clock.now();
        let completed_today = self.completed_today(now).await?;
        let requested = due_count(&settings, trigger, now.with_timezone(&self.tz), completed_today);
        let mut summary = GenerationSummary::new(requested);
        if requested == 0 {
            return Ok(Some(summary));
        }
        info!(requested, ?trigger, remaining = settings.remaining(), "generation run starting");

        let mut stop_reason = NO_TITLES_LEFT;
        let mut queued = self.ledger.pending().await?.into_iter();
        while summary.slots.len() < requested as usize {
            let job = match queued.next() {
                Some(job) => job,
                None => match self.ledger.claim_next().await? {
                    Some((job, _)) => job,
                    None => break,
                },
            };
            match self.run_slot(&settings, job).await? {
                Some(report) if report.status == SlotStatus::Skipped => {
                    summary.record(report);
                    stop_reason = QUOTA_REACHED;
                    break;
                }
                Some(report) => summary.record(report),
                None => {}
            }
        }

        let unfilled = requested as usize - summary.slots.len();
        if unfilled > 0 {
            warn!(skipped = unfilled, reason = stop_reason, "run ended before every slot was filled");
            for _ in 0..unfilled {
                summary.record(SlotReport::skipped(stop_reason));
            }
        }

        info!(
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "generation run finished"
        );
        Ok(Some(summary))
    }

    /// One title through the pipeline. `None` when the job was cancelled
    /// between being queued and being started; a skipped report when another
    /// process filled the campaign while this slot was generating.
    async fn run_slot(&self, settings: &Settings, job: Job) -> Result<Option<SlotReport>> {
        let job = match self.ledger.mark_processing(job).await {
            Ok(job) => job,
            Err(e) if matches!(e.downcast_ref::<LedgerError>(), Some(LedgerError::InvalidTransition { .. })) => {
                debug!(error = %e, "job left the queue before it started");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        info!(job = %job.id, title = %job.title, attempt = job.attempts + 1, "slot starting");

        match self.pipeline.produce(settings, &job.title).await {
            Ok(article) => {
                let job = match self.ledger.mark_completed(job.clone(), &article.id).await {
                    Ok(job) => job,
                    Err(e) if matches!(e.downcast_ref::<LedgerError>(), Some(LedgerError::QuotaReached)) => {
                        warn!(job = %job.id, "total reached by another run, discarding article");
                        let job = self.ledger.abandon(job, &article.id, QUOTA_REACHED).await?;
                        return Ok(Some(SlotReport::abandoned(&job, QUOTA_REACHED)));
                    }
                    Err(e) => return Err(e),
                };
                if settings.notify_on_completion && !settings.whatsapp_notification_numbers.is_empty() {
                    self.dispatcher
                        .notify(&article, &settings.whatsapp_notification_numbers, settings.language)
                        .await;
                }
                Ok(Some(SlotReport::completed(&job, &article.id)))
            }
            Err(PipelineError::Storage(e)) => {
                if let Err(mark) = self.ledger.mark_failed(job, "storage error").await {
                    warn!(error = %mark, "could not record slot failure");
                }
                Err(e.context("running generation slot"))
            }
            Err(e) => {
                let reason = e.to_string();
                let job = self.ledger.mark_failed(job, &reason).await?;
                Ok(Some(SlotReport::failed(&job, reason)))
            }
        }
    }

    async fn completed_today(&self, now: DateTime<Utc>) -> Result<u32> {
        let midnight = now.with_timezone(&self.tz).date_naive().and_time(NaiveTime::MIN);
        let since = self
            .tz
            .from_local_datetime(&midnight)
            .earliest()
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|| midnight.and_utc());
        let count = self.ledger.completed_since(since).await?;
        Ok(count.clamp(0, i64::from(u32::MAX)) as u32)
    }

    pub async fn get_progress(&self) -> Result<Progress> {
        let Some(settings) = store::get_settings(&self.pool).await? else {
            return Ok(Progress::default());
        };

        let now = self.clock.now();
        let completed_today = self.completed_today(now).await?;
        let total = settings.total_articles_needed;
        let generated = settings.articles_generated;
        let progress_percentage = if total == 0 {
            0
        } else {
            ((f64::from(generated) / f64::from(total)) * 100.0).round().min(100.0) as u32
        };

        Ok(Progress {
            configured: true,
            generated,
            total,
            remaining: settings.remaining(),
            progress_percentage,
            completed_today,
            due_now: due_count(&settings, Trigger::Schedule, now.with_timezone(&self.tz), completed_today),
            unused_titles: settings.unused_titles() as u32,
            is_active: settings.is_active,
            last_generated_at: settings.last_generated_at,
        })
    }

    /// Render and generate for a sample title without touching the title pool
    /// or the counters. With `save_draft` the result is stored as a draft.
    pub async fn test_prompt(
        &self,
        overrides: Option<Settings>,
        sample_title: &str,
        save_draft: bool,
    ) -> Result<PromptPreview> {
        let title = sample_title.trim();
        if title.is_empty() {
            anyhow::bail!(ConfigError::Validation("sample title must not be empty".to_string()));
        }

        let settings = match overrides {
            Some(settings) => settings,
            None => store::get_settings(&self.pool).await?.unwrap_or_default(),
        };

        let prompt = self.pipeline.prompt(&settings, title);
        let parsed = self.pipeline.draft(&prompt).await?;
        let article = if save_draft {
            Some(self.pipeline.store(&settings, &parsed, ArticleStatus::Draft).await?)
        } else {
            None
        };

        info!(title = %title, saved = article.is_some(), "prompt tested");
        Ok(PromptPreview { prompt, parsed, article })
    }

    /// Requeue a failed job. `false` when it has used all its attempts.
    pub async fn retry_job(&self, job_id: &str) -> Result<bool> {
        let job = self.ledger.get(job_id).await?;
        self.ledger.retry(job).await
    }

    pub async fn cancel_pending_jobs(&self) -> Result<u64> {
        self.ledger.cancel_all_pending().await
    }

    /// Start the campaign over: counters go back to zero and queued jobs are
    /// cancelled. With `reset_titles` every title becomes available again.
    pub async fn reset_progress(&self, reset_titles: bool) -> Result<ResetReport> {
        let cancelled_jobs = self.ledger.cancel_all_pending().await?;
        store::reset_counters(&self.pool).await?;
        let titles_reset = if reset_titles {
            store::reset_titles(&self.pool).await?
        } else {
            0
        };
        info!(cancelled_jobs, titles_reset, "progress reset");
        Ok(ResetReport {
            cancelled_jobs,
            titles_reset,
        })
    }

    pub async fn list_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        self.ledger.list_recent(limit.clamp(1, 500)).await
    }

    /// Fail jobs a previous process left in `processing`.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        self.ledger.fail_interrupted().await
    }

    pub async fn settings(&self) -> Result<Option<Settings>> {
        store::get_settings(&self.pool).await
    }

    /// Validate and store new settings. Counters and titles are left alone.
    pub async fn update_settings(&self, mut settings: Settings) -> Result<Settings> {
        if settings.number_of_paragraphs == 0 || settings.average_words_per_paragraph == 0 {
            anyhow::bail!(ConfigError::Validation(
                "paragraph count and words per paragraph must be at least 1".to_string()
            ));
        }
        if settings.articles_per_day == 0 {
            anyhow::bail!(ConfigError::Validation("articles_per_day must be at least 1".to_string()));
        }

        settings.target_keywords = dedup_keywords(&settings.target_keywords);
        settings.image_search_keywords = dedup_keywords(&settings.image_search_keywords);
        settings.whatsapp_notification_numbers = settings
            .whatsapp_notification_numbers
            .iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();

        store::save_settings(&self.pool, &settings).await?;
        info!(
            active = settings.is_active,
            total = settings.total_articles_needed,
            per_day = settings.articles_per_day,
            "generation settings updated"
        );
        store::get_settings(&self.pool)
            .await?
            .context("settings vanished after saving")
    }

    pub async fn add_titles(&self, titles: &[String]) -> Result<Vec<ReadyTitle>> {
        store::get_or_create_settings(&self.pool).await?;
        let added = store::add_titles(&self.pool, titles).await?;
        info!(added = added.len(), submitted = titles.len(), "titles added");
        Ok(added)
    }

    pub async fn list_titles(&self) -> Result<Vec<ReadyTitle>> {
        store::list_titles(&self.pool).await
    }

    pub async fn list_articles(&self) -> Result<Vec<Article>> {
        store::list_articles(&self.pool).await
    }

    pub async fn get_article(&self, id: &str) -> Result<Option<Article>> {
        store::get_article(&self.pool, id).await
    }
}

/// Wake every `interval` and run whatever is due until cancelled.
pub async fn scheduler_loop(scheduler: Arc<Scheduler>, interval: Duration, cancel: CancellationToken) {
    info!(interval = %humantime::format_duration(interval), "scheduler started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("scheduler shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match scheduler.run_due().await {
            Ok(Some(summary)) if summary.requested > 0 => {
                info!(
                    completed = summary.completed,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "scheduled generation complete"
                );
            }
            Ok(_) => debug!("nothing due"),
            Err(e) => error!(error = %e, "scheduled generation failed"),
        }
    }
}
