use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{ConfigError, LedgerError, PipelineError};
use crate::models::Settings;
use crate::scheduler::Scheduler;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/progress", get(progress_handler))
        .route("/api/generate", post(generate_handler))
        .route("/api/test-prompt", post(test_prompt_handler))
        .route("/api/jobs", get(jobs_handler))
        .route("/api/jobs/cancel-pending", post(cancel_pending_handler))
        .route("/api/jobs/{id}/retry", post(retry_handler))
        .route("/api/reset", post(reset_handler))
        .route("/api/settings", get(get_settings_handler).put(put_settings_handler))
        .route("/api/titles", get(list_titles_handler).post(add_titles_handler))
        .route("/api/articles", get(list_articles_handler))
        .route("/api/articles/{id}", get(get_article_handler))
        .with_state(state)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Map a service error onto an HTTP status. Anything unrecognized is a 500
/// whose details only go to the log.
fn error_response(e: &anyhow::Error, action: &str) -> Response {
    if let Some(ledger) = e.downcast_ref::<LedgerError>() {
        let status = match ledger {
            LedgerError::NotFound(_) | LedgerError::UnknownTitle(_) => StatusCode::NOT_FOUND,
            LedgerError::InvalidTransition { .. }
            | LedgerError::TitleAlreadyClaimed(_)
            | LedgerError::QuotaReached => StatusCode::CONFLICT,
        };
        return error_body(status, ledger.to_string());
    }
    if let Some(ConfigError::Validation(msg)) = e.downcast_ref::<ConfigError>() {
        return error_body(StatusCode::BAD_REQUEST, msg.clone());
    }
    if let Some(pipeline) = e.downcast_ref::<PipelineError>()
        && !matches!(pipeline, PipelineError::Storage(_))
    {
        return error_body(StatusCode::BAD_GATEWAY, pipeline.to_string());
    }

    warn!(error = %e, action, "request failed");
    error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
}

async fn progress_handler(State(state): State<AppState>) -> Response {
    match state.scheduler.get_progress().await {
        Ok(progress) => Json(progress).into_response(),
        Err(e) => error_response(&e, "reading progress"),
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateRequest {
    #[serde(default)]
    count: Option<u32>,
}

async fn generate_handler(State(state): State<AppState>, body: Option<Json<GenerateRequest>>) -> Response {
    let count = body.and_then(|Json(b)| b.count).unwrap_or(1);
    debug!(count, "manual generation requested");

    match state.scheduler.generate_now(count).await {
        Ok(Some(summary)) => Json(summary).into_response(),
        Ok(None) => error_body(StatusCode::CONFLICT, "generation settings are not configured"),
        Err(e) => error_response(&e, "generating articles"),
    }
}

#[derive(Debug, Deserialize)]
struct TestPromptRequest {
    #[serde(default)]
    settings: Option<Settings>,
    title: String,
    #[serde(default)]
    save_draft: bool,
}

async fn test_prompt_handler(State(state): State<AppState>, Json(req): Json<TestPromptRequest>) -> Response {
    match state
        .scheduler
        .test_prompt(req.settings, &req.title, req.save_draft)
        .await
    {
        Ok(preview) => Json(preview).into_response(),
        Err(e) => error_response(&e, "testing prompt"),
    }
}

#[derive(Debug, Deserialize)]
struct JobsQuery {
    limit: Option<i64>,
}

async fn jobs_handler(State(state): State<AppState>, Query(query): Query<JobsQuery>) -> Response {
    match state.scheduler.list_jobs(query.limit.unwrap_or(50)).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => error_response(&e, "listing jobs"),
    }
}

async fn retry_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.scheduler.retry_job(&id).await {
        Ok(retried) => Json(json!({ "retried": retried })).into_response(),
        Err(e) => error_response(&e, "retrying job"),
    }
}

async fn cancel_pending_handler(State(state): State<AppState>) -> Response {
    match state.scheduler.cancel_pending_jobs().await {
        Ok(count) => Json(json!({ "cancelled_count": count })).into_response(),
        Err(e) => error_response(&e, "cancelling jobs"),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ResetRequest {
    #[serde(default)]
    reset_titles: bool,
}

async fn reset_handler(State(state): State<AppState>, body: Option<Json<ResetRequest>>) -> Response {
    let reset_titles = body.is_some_and(|Json(b)| b.reset_titles);
    match state.scheduler.reset_progress(reset_titles).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(&e, "resetting progress"),
    }
}

async fn get_settings_handler(State(state): State<AppState>) -> Response {
    match state.scheduler.settings().await {
        Ok(Some(settings)) => Json(settings).into_response(),
        Ok(None) => error_body(StatusCode::NOT_FOUND, "generation settings are not configured"),
        Err(e) => error_response(&e, "reading settings"),
    }
}

async fn put_settings_handler(State(state): State<AppState>, Json(settings): Json<Settings>) -> Response {
    match state.scheduler.update_settings(settings).await {
        Ok(saved) => Json(saved).into_response(),
        Err(e) => error_response(&e, "saving settings"),
    }
}

async fn list_titles_handler(State(state): State<AppState>) -> Response {
    match state.scheduler.list_titles().await {
        Ok(titles) => Json(titles).into_response(),
        Err(e) => error_response(&e, "listing titles"),
    }
}

#[derive(Debug, Deserialize)]
struct AddTitlesRequest {
    titles: Vec<String>,
}

async fn add_titles_handler(State(state): State<AppState>, Json(req): Json<AddTitlesRequest>) -> Response {
    match state.scheduler.add_titles(&req.titles).await {
        Ok(added) => (StatusCode::CREATED, Json(added)).into_response(),
        Err(e) => error_response(&e, "adding titles"),
    }
}

async fn list_articles_handler(State(state): State<AppState>) -> Response {
    match state.scheduler.list_articles().await {
        Ok(articles) => Json(articles).into_response(),
        Err(e) => error_response(&e, "listing articles"),
    }
}

async fn get_article_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.scheduler.get_article(&id).await {
        Ok(Some(article)) => Json(article).into_response(),
        Ok(None) => error_body(StatusCode::NOT_FOUND, format!("article {id} not found")),
        Err(e) => error_response(&e, "reading article"),
    }
}
