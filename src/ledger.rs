//! Job bookkeeping: one row per generation attempt.
//!
//! State changes are computed on `Job` snapshots (see `models::Job`) and then
//! written with a status-conditional UPDATE, so two writers can never both
//! move the same job out of the same state.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::LedgerError;
use crate::models::{Job, JobStatus, ReadyTitle, RetryOutcome};
use crate::store;

/// How many times `claim_next` re-reads the pool after losing a claim race.
const CLAIM_RACE_RETRIES: usize = 5;

pub struct JobLedger {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl JobLedger {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Create a pending job holding `title_id`.
    pub async fn claim(&self, title_id: &str) -> Result<Job> {
        let title = store::get_title(&self.pool, title_id)
            .await?
            .ok_or_else(|| LedgerError::UnknownTitle(title_id.to_string()))?;
        if title.used {
            return Err(LedgerError::TitleAlreadyClaimed(title.id).into());
        }

        let job = Job::new(&title, self.clock.now());
        match store::insert_job_for_unused_title(&self.pool, &job).await {
            Ok(true) => {
                debug!(job = %job.id, title = %job.title, "title claimed");
                Ok(job)
            }
            Ok(false) => Err(LedgerError::TitleAlreadyClaimed(title.id).into()),
            Err(e) if is_unique_violation(&e) => Err(LedgerError::TitleAlreadyClaimed(title.id).into()),
            Err(e) => Err(anyhow::Error::new(e).context("inserting job")),
        }
    }

    /// Claim the first available title in pool order. `None` when the pool is dry.
    pub async fn claim_next(&self) -> Result<Option<(Job, ReadyTitle)>> {
        for _ in 0..CLAIM_RACE_RETRIES {
            let Some(title) = store::first_available_title(&self.pool).await? else {
                return Ok(None);
            };
            match self.claim(&title.id).await {
                Ok(job) => return Ok(Some((job, title))),
                Err(e) if matches!(e.downcast_ref::<LedgerError>(), Some(LedgerError::TitleAlreadyClaimed(_))) => {
                    debug!(title = %title.title, "lost claim race, trying next title");
                }
                Err(e) => return Err(e),
            }
        }
        warn!("could not claim a title after repeated races");
        Ok(None)
    }

    async fn write(&self, next: &Job, expected: JobStatus) -> Result<()> {
        let written = store::update_job_if_status(&self.pool, next, expected)
            .await
            .with_context(|| format!("updating job {}", next.id))?;
        if !written {
            return Err(LedgerError::InvalidTransition {
                id: next.id.clone(),
                from: expected.to_string(),
                to: next.status.to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub async fn mark_processing(&self, job: Job) -> Result<Job> {
        let next = job.start(self.clock.now())?;
        self.write(&next, JobStatus::Pending).await?;
        Ok(next)
    }

    /// Complete the job and, in the same transaction, mark its title used and
    /// count the article. `QuotaReached` when the total is already met, in
    /// which case nothing was written.
    pub async fn mark_completed(&self, job: Job, article_id: &str) -> Result<Job> {
        let now = self.clock.now();
        let next = job.complete(article_id, now)?;
        if !store::record_slot_success(&self.pool, &next, article_id, now).await? {
            return Err(LedgerError::QuotaReached.into());
        }
        Ok(next)
    }

    /// Cancel a processing job and drop the article it produced. The title
    /// goes back to the pool with no attempt charged.
    pub async fn abandon(&self, job: Job, article_id: &str, reason: &str) -> Result<Job> {
        let next = job.abandon(reason, self.clock.now())?;
        store::abandon_slot(&self.pool, &next, article_id).await?;
        info!(job = %next.id, reason = %reason, "job abandoned");
        Ok(next)
    }

    pub async fn mark_failed(&self, job: Job, reason: &str) -> Result<Job> {
        let expected = job.status;
        let next = job.fail(reason, self.clock.now())?;
        self.write(&next, expected).await?;
        info!(job = %next.id, attempts = next.attempts, reason = %reason, "job failed");
        Ok(next)
    }

    /// Requeue a failed job. `Ok(false)` when it has no attempts left or its
    /// title has since been used or claimed by another job.
    pub async fn retry(&self, job: Job) -> Result<bool> {
        let next = match job.retry(self.clock.now())? {
            RetryOutcome::Exhausted(job) => {
                info!(job = %job.id, attempts = job.attempts, "retry refused, max attempts reached");
                return Ok(false);
            }
            RetryOutcome::Requeued(next) => next,
        };

        let title_used = store::get_title(&self.pool, &next.title_id)
            .await?
            .is_none_or(|t| t.used);
        if title_used {
            info!(job = %next.id, "retry refused, title already used");
            return Ok(false);
        }

        match store::update_job_if_status(&self.pool, &next, JobStatus::Failed).await {
            Ok(true) => {
                info!(job = %next.id, attempts = next.attempts, "job requeued");
                Ok(true)
            }
            Ok(false) => Err(LedgerError::InvalidTransition {
                id: next.id,
                from: JobStatus::Failed.to_string(),
                to: JobStatus::Pending.to_string(),
            }
            .into()),
            Err(e) if is_unique_violation(&e) => {
                info!(job = %next.id, "retry refused, title is held by another job");
                Ok(false)
            }
            Err(e) => Err(anyhow::Error::new(e).context("requeueing job")),
        }
    }

    /// Cancel every queued job. Jobs already processing are left to finish.
    pub async fn cancel_all_pending(&self) -> Result<u64> {
        let count = store::cancel_pending_jobs(&self.pool, self.clock.now()).await?;
        if count > 0 {
            info!(count, "pending jobs cancelled");
        }
        Ok(count)
    }

    /// Fail jobs a previous process left mid-pipeline.
    pub async fn fail_interrupted(&self) -> Result<u64> {
        let count = store::fail_processing_jobs(&self.pool, "interrupted", self.clock.now()).await?;
        if count > 0 {
            warn!(count, "marked interrupted jobs as failed");
        }
        Ok(count)
    }

    pub async fn get(&self, id: &str) -> Result<Job> {
        store::get_job(&self.pool, id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(id.to_string()).into())
    }

    pub async fn pending(&self) -> Result<Vec<Job>> {
        store::pending_jobs(&self.pool).await
    }

    pub async fn list_recent(&self, limit: i64) -> Result<Vec<Job>> {
        store::list_jobs(&self.pool, limit).await
    }

    pub async fn completed_since(&self, since: DateTime<Utc>) -> Result<i64> {
        store::count_completed_since(&self.pool, since).await
    }
}
