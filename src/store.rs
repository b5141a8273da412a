use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Article, ArticleRow, Job, JobStatus, ReadyTitle, Settings, SettingsRow};

/// All settings columns in SELECT order (must match SettingsRow field order).
const SETTINGS_COLUMNS: &str = "prompt_template, number_of_paragraphs, average_words_per_paragraph,
    target_keywords, language, include_images, include_cover_image, image_search_keywords, auto_publish,
    total_articles_needed, articles_per_day, start_date, generation_time, is_active,
    whatsapp_notification_numbers, notify_on_completion, articles_generated, last_generated_at";

const JOB_COLUMNS: &str =
    "id, title_id, title, status, scheduled_for, attempts, article_id, failure_reason, created_at, updated_at";

const ARTICLE_COLUMNS: &str = "id, title, slug, body, body_html, excerpt, meta_title, meta_description, keywords,
    language, status, cover_image, content_images, created_by, created_at, published_at";

/// Timestamps are stored as fixed-width UTC text so they sort lexically.
pub fn ts(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

// ── Settings ───────────────────────────────────────────────────────────

/// Load the settings singleton with its title pool, if it has been created.
pub async fn get_settings(pool: &SqlitePool) -> Result<Option<Settings>> {
    let query = format!("SELECT {SETTINGS_COLUMNS} FROM generation_settings WHERE id = 1");
    let row = sqlx::query_as::<_, SettingsRow>(&query)
        .fetch_optional(pool)
        .await
        .context("querying generation settings")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let titles = list_titles(pool).await?;
    Ok(Some(settings_from_row(row, titles)?))
}

pub async fn get_or_create_settings(pool: &SqlitePool) -> Result<Settings> {
    sqlx::query("INSERT OR IGNORE INTO generation_settings (id) VALUES (1)")
        .execute(pool)
        .await
        .context("creating generation settings")?;

    get_settings(pool)
        .await?
        .ok_or_else(|| anyhow::anyhow!("generation settings missing after creation"))
}

/// Save the editable part of the settings. Counters and titles are left alone.
pub async fn save_settings(pool: &SqlitePool, settings: &Settings) -> Result<()> {
    let target_keywords = serde_json::to_string(&settings.target_keywords).context("serializing target_keywords")?;
    let image_keywords =
        serde_json::to_string(&settings.image_search_keywords).context("serializing image_search_keywords")?;
    let numbers = serde_json::to_string(&settings.whatsapp_notification_numbers)
        .context("serializing whatsapp_notification_numbers")?;

    sqlx::query(
        "INSERT INTO generation_settings (id, prompt_template, number_of_paragraphs, average_words_per_paragraph,
         target_keywords, language, include_images, include_cover_image, image_search_keywords, auto_publish,
         total_articles_needed, articles_per_day, start_date, generation_time, is_active,
         whatsapp_notification_numbers, notify_on_completion)
         VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           prompt_template = excluded.prompt_template,
           number_of_paragraphs = excluded.number_of_paragraphs,
           average_words_per_paragraph = excluded.average_words_per_paragraph,
           target_keywords = excluded.target_keywords,
           language = excluded.language,
           include_images = excluded.include_images,
           include_cover_image = excluded.include_cover_image,
           image_search_keywords = excluded.image_search_keywords,
           auto_publish = excluded.auto_publish,
           total_articles_needed = excluded.total_articles_needed,
           articles_per_day = excluded.articles_per_day,
           start_date = excluded.start_date,
           generation_time = excluded.generation_time,
           is_active = excluded.is_active,
           whatsapp_notification_numbers = excluded.whatsapp_notification_numbers,
           notify_on_completion = excluded.notify_on_completion,
           updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
    )
    .bind(&settings.prompt_template)
    .bind(settings.number_of_paragraphs as i64)
    .bind(settings.average_words_per_paragraph as i64)
    .bind(&target_keywords)
    .bind(settings.language.as_str())
    .bind(settings.include_images)
    .bind(settings.include_cover_image)
    .bind(&image_keywords)
    .bind(settings.auto_publish)
    .bind(settings.total_articles_needed as i64)
    .bind(settings.articles_per_day as i64)
    .bind(settings.start_date.map(|d| d.format("%Y-%m-%d").to_string()))
    .bind(settings.generation_time.format("%H:%M").to_string())
    .bind(settings.is_active)
    .bind(&numbers)
    .bind(settings.notify_on_completion)
    .execute(pool)
    .await
    .context("saving generation settings")?;

    debug!("generation settings saved");
    Ok(())
}

fn settings_from_row(row: SettingsRow, ready_titles: Vec<ReadyTitle>) -> Result<Settings> {
    let start_date = row
        .start_date
        .as_deref()
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()
        .with_context(|| format!("invalid stored start_date {:?}", row.start_date))?;
    let generation_time = NaiveTime::parse_from_str(&row.generation_time, "%H:%M")
        .with_context(|| format!("invalid stored generation_time '{}'", row.generation_time))?;

    Ok(Settings {
        prompt_template: row.prompt_template,
        number_of_paragraphs: row.number_of_paragraphs.max(0) as u32,
        average_words_per_paragraph: row.average_words_per_paragraph.max(0) as u32,
        target_keywords: serde_json::from_str(&row.target_keywords).context("decoding target_keywords")?,
        language: row.language,
        include_images: row.include_images,
        include_cover_image: row.include_cover_image,
        image_search_keywords: serde_json::from_str(&row.image_search_keywords)
            .context("decoding image_search_keywords")?,
        auto_publish: row.auto_publish,
        total_articles_needed: row.total_articles_needed.max(0) as u32,
        articles_per_day: row.articles_per_day.max(0) as u32,
        start_date,
        generation_time,
        is_active: row.is_active,
        whatsapp_notification_numbers: serde_json::from_str(&row.whatsapp_notification_numbers)
            .context("decoding whatsapp_notification_numbers")?,
        notify_on_completion: row.notify_on_completion,
        ready_titles,
        articles_generated: row.articles_generated.max(0) as u32,
        last_generated_at: row.last_generated_at,
    })
}

/// Zero the progress counters.
pub async fn reset_counters(pool: &SqlitePool) -> Result<()> {
    sqlx::query("UPDATE generation_settings SET articles_generated = 0, last_generated_at = NULL WHERE id = 1")
        .execute(pool)
        .await
        .context("resetting generation counters")?;
    Ok(())
}

// ── Title pool ─────────────────────────────────────────────────────────

pub async fn list_titles(pool: &SqlitePool) -> Result<Vec<ReadyTitle>> {
    let titles = sqlx::query_as::<_, ReadyTitle>(
        "SELECT id, title, used, used_at, article_id FROM ready_titles ORDER BY position ASC",
    )
    .fetch_all(pool)
    .await
    .context("querying ready titles")?;
    Ok(titles)
}

pub async fn get_title(pool: &SqlitePool, id: &str) -> Result<Option<ReadyTitle>> {
    let title =
        sqlx::query_as::<_, ReadyTitle>("SELECT id, title, used, used_at, article_id FROM ready_titles WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("querying ready title")?;
    Ok(title)
}

/// Append titles to the end of the pool. Blank titles and titles already in the
/// pool are skipped. Returns the titles that were added.
pub async fn add_titles(pool: &SqlitePool, titles: &[String]) -> Result<Vec<ReadyTitle>> {
    let mut tx = pool.begin().await.context("starting title import")?;

    let (max_position,): (Option<i64>,) = sqlx::query_as("SELECT MAX(position) FROM ready_titles")
        .fetch_one(&mut *tx)
        .await
        .context("reading title positions")?;
    let mut position = max_position.unwrap_or(0);

    let mut added = Vec::new();
    for raw in titles {
        let title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if title.is_empty() {
            continue;
        }

        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM ready_titles WHERE title = ?")
            .bind(&title)
            .fetch_optional(&mut *tx)
            .await
            .context("checking for existing title")?;
        if exists.is_some() {
            debug!(title = %title, "title already in pool, skipping");
            continue;
        }

        position += 1;
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO ready_titles (id, position, title) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(position)
            .bind(&title)
            .execute(&mut *tx)
            .await
            .context("inserting ready title")?;

        added.push(ReadyTitle {
            id,
            title,
            used: false,
            used_at: None,
            article_id: None,
        });
    }

    tx.commit().await.context("committing title import")?;
    Ok(added)
}

/// First unused title (pool order) with no active or failed job. A title whose
/// job failed stays parked until that job is retried.
pub async fn first_available_title(pool: &SqlitePool) -> Result<Option<ReadyTitle>> {
    let title = sqlx::query_as::<_, ReadyTitle>(
        "SELECT t.id, t.title, t.used, t.used_at, t.article_id
         FROM ready_titles t
         WHERE t.used = 0
           AND NOT EXISTS (
             SELECT 1 FROM generation_jobs j
             WHERE j.title_id = t.id AND j.status IN ('pending', 'processing', 'failed')
           )
         ORDER BY t.position ASC
         LIMIT 1",
    )
    .fetch_optional(pool)
    .await
    .context("querying first available title")?;
    Ok(title)
}

/// Mark every title unused again. Returns how many titles changed.
pub async fn reset_titles(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("UPDATE ready_titles SET used = 0, used_at = NULL, article_id = NULL WHERE used = 1")
        .execute(pool)
        .await
        .context("resetting ready titles")?;
    Ok(result.rows_affected())
}

// ── Articles ───────────────────────────────────────────────────────────

/// Insert an article. Returns the raw driver error so callers can tell a slug
/// collision apart from an outage.
pub async fn insert_article(pool: &SqlitePool, article: &Article) -> Result<(), sqlx::Error> {
    let keywords = serde_json::to_string(&article.seo.keywords).unwrap_or_else(|_| "[]".to_string());
    let content_images = serde_json::to_string(&article.content_images).unwrap_or_else(|_| "[]".to_string());

    sqlx::query(
        "INSERT INTO articles (id, title, slug, body, body_html, excerpt, meta_title, meta_description, keywords,
         language, status, cover_image, content_images, created_by, created_at, published_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&article.id)
    .bind(&article.title)
    .bind(&article.slug)
    .bind(&article.body)
    .bind(&article.body_html)
    .bind(&article.excerpt)
    .bind(&article.seo.meta_title)
    .bind(&article.seo.meta_description)
    .bind(&keywords)
    .bind(article.language.as_str())
    .bind(article.status.as_str())
    .bind(&article.cover_image)
    .bind(&content_images)
    .bind(&article.created_by)
    .bind(ts(article.created_at))
    .bind(article.published_at.map(ts))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_article(pool: &SqlitePool, id: &str) -> Result<Option<Article>> {
    let query = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?");
    let row = sqlx::query_as::<_, ArticleRow>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("querying article")?;
    Ok(row.map(Article::from))
}

pub async fn list_articles(pool: &SqlitePool) -> Result<Vec<Article>> {
    let query = format!("SELECT {ARTICLE_COLUMNS} FROM articles ORDER BY created_at ASC, rowid ASC");
    let rows = sqlx::query_as::<_, ArticleRow>(&query)
        .fetch_all(pool)
        .await
        .context("querying articles")?;
    Ok(rows.into_iter().map(Article::from).collect())
}

// ── Jobs ───────────────────────────────────────────────────────────────

/// Insert a freshly claimed job, but only while its title is still unused and
/// has no failed job waiting for a retry. Returns false otherwise; a second
/// active job for the same title fails on the partial unique index.
pub async fn insert_job_for_unused_title(pool: &SqlitePool, job: &Job) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO generation_jobs (id, title_id, title, status, scheduled_for, attempts, article_id,
         failure_reason, created_at, updated_at)
         SELECT ?, t.id, ?, ?, ?, ?, ?, ?, ?, ?
         FROM ready_titles t WHERE t.id = ? AND t.used = 0
           AND NOT EXISTS (
             SELECT 1 FROM generation_jobs j WHERE j.title_id = t.id AND j.status = 'failed'
           )",
    )
    .bind(&job.id)
    .bind(&job.title)
    .bind(job.status.as_str())
    .bind(ts(job.scheduled_for))
    .bind(job.attempts)
    .bind(&job.article_id)
    .bind(&job.failure_reason)
    .bind(ts(job.created_at))
    .bind(ts(job.updated_at))
    .bind(&job.title_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Write a job snapshot only if the stored row is still in `expected` status.
/// Returns false when another writer got there first.
pub async fn update_job_if_status(pool: &SqlitePool, job: &Job, expected: JobStatus) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE generation_jobs
         SET status = ?, scheduled_for = ?, attempts = ?, article_id = ?, failure_reason = ?, updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(job.status.as_str())
    .bind(ts(job.scheduled_for))
    .bind(job.attempts)
    .bind(&job.article_id)
    .bind(&job.failure_reason)
    .bind(ts(job.updated_at))
    .bind(&job.id)
    .bind(expected.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn get_job(pool: &SqlitePool, id: &str) -> Result<Option<Job>> {
    let query = format!("SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = ?");
    let job = sqlx::query_as::<_, Job>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("querying job")?;
    Ok(job)
}

/// Most recent jobs first.
pub async fn list_jobs(pool: &SqlitePool, limit: i64) -> Result<Vec<Job>> {
    let query = format!("SELECT {JOB_COLUMNS} FROM generation_jobs ORDER BY created_at DESC, rowid DESC LIMIT ?");
    let jobs = sqlx::query_as::<_, Job>(&query)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("querying jobs")?;
    Ok(jobs)
}

/// Queued jobs, oldest first.
pub async fn pending_jobs(pool: &SqlitePool) -> Result<Vec<Job>> {
    let query = format!(
        "SELECT {JOB_COLUMNS} FROM generation_jobs WHERE status = 'pending' ORDER BY scheduled_for ASC, rowid ASC"
    );
    let jobs = sqlx::query_as::<_, Job>(&query)
        .fetch_all(pool)
        .await
        .context("querying pending jobs")?;
    Ok(jobs)
}

pub async fn cancel_pending_jobs(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("UPDATE generation_jobs SET status = 'cancelled', updated_at = ? WHERE status = 'pending'")
        .bind(ts(now))
        .execute(pool)
        .await
        .context("cancelling pending jobs")?;
    Ok(result.rows_affected())
}

pub async fn fail_processing_jobs(pool: &SqlitePool, reason: &str, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE generation_jobs
         SET status = 'failed', attempts = attempts + 1, failure_reason = ?, updated_at = ?
         WHERE status = 'processing'",
    )
    .bind(reason)
    .bind(ts(now))
    .execute(pool)
    .await
    .context("failing interrupted jobs")?;
    Ok(result.rows_affected())
}

pub async fn count_completed_since(pool: &SqlitePool, since: DateTime<Utc>) -> Result<i64> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM generation_jobs WHERE status = 'completed' AND updated_at >= ?")
            .bind(ts(since))
            .fetch_one(pool)
            .await
            .context("counting completed jobs")?;
    Ok(count)
}

/// Record a finished slot atomically: the job completes, its title becomes used
/// and points at the article, and the progress counter moves. Returns false,
/// with nothing written, when the counter already reached the total.
pub async fn record_slot_success(
    pool: &SqlitePool,
    job: &Job,
    article_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let mut tx = pool.begin().await.context("starting slot completion")?;

    let counted = sqlx::query(
        "UPDATE generation_settings SET articles_generated = articles_generated + 1, last_generated_at = ?
         WHERE id = 1 AND articles_generated < total_articles_needed",
    )
    .bind(ts(now))
    .execute(&mut *tx)
    .await
    .context("incrementing articles_generated")?;
    if counted.rows_affected() != 1 {
        tx.rollback().await.context("rolling back slot completion")?;
        return Ok(false);
    }

    let updated = sqlx::query(
        "UPDATE generation_jobs SET status = 'completed', article_id = ?, failure_reason = NULL, updated_at = ?
         WHERE id = ? AND status = 'processing'",
    )
    .bind(article_id)
    .bind(ts(now))
    .bind(&job.id)
    .execute(&mut *tx)
    .await
    .context("completing job")?;
    if updated.rows_affected() != 1 {
        anyhow::bail!("job {} is no longer processing", job.id);
    }

    let updated = sqlx::query("UPDATE ready_titles SET used = 1, used_at = ?, article_id = ? WHERE id = ? AND used = 0")
        .bind(ts(now))
        .bind(article_id)
        .bind(&job.title_id)
        .execute(&mut *tx)
        .await
        .context("marking title used")?;
    if updated.rows_affected() != 1 {
        anyhow::bail!("title {} was already used", job.title_id);
    }

    tx.commit().await.context("committing slot completion")?;
    Ok(true)
}

/// Undo a slot that produced an article the campaign no longer has room for:
/// the job is cancelled and the article removed, leaving the title unused.
pub async fn abandon_slot(pool: &SqlitePool, job: &Job, article_id: &str) -> Result<()> {
    let mut tx = pool.begin().await.context("starting slot rollback")?;

    let updated = sqlx::query(
        "UPDATE generation_jobs SET status = ?, article_id = NULL, failure_reason = ?, updated_at = ?
         WHERE id = ? AND status = 'processing'",
    )
    .bind(job.status.as_str())
    .bind(&job.failure_reason)
    .bind(ts(job.updated_at))
    .bind(&job.id)
    .execute(&mut *tx)
    .await
    .context("cancelling job")?;
    if updated.rows_affected() != 1 {
        anyhow::bail!("job {} is no longer processing", job.id);
    }

    sqlx::query("DELETE FROM articles WHERE id = ?")
        .bind(article_id)
        .execute(&mut *tx)
        .await
        .context("removing surplus article")?;

    tx.commit().await.context("committing slot rollback")?;
    Ok(())
}
