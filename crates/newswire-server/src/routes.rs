use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use newswire_core::article::{ArticleDescriptor, ArticleStatus};
use newswire_core::error::AppError;
use newswire_core::job::JobStatus;
use newswire_core::queue::WorkQueue;
use newswire_core::store::Store;
use newswire_core::traits::UpdatePublisher;

use crate::dto::{
    ArticleResult, CancelResponse, FailedArticle, HealthResponse, JobResultsResponse,
    JobStatusResponse, ListJobsQuery, SubmitRequest, SubmitResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;
use crate::ws;

/// Build the full router with all routes and middleware.
pub fn router<S, Q, B>(state: Arc<AppState<S, Q, B>>) -> Router
where
    S: Store + 'static,
    Q: WorkQueue + 'static,
    B: UpdatePublisher + 'static,
{
    Router::new()
        .route("/jobs/submit", post(submit_job::<S, Q, B>))
        .route("/jobs", get(list_jobs::<S, Q, B>))
        .route("/jobs/", get(list_jobs::<S, Q, B>))
        .route("/jobs/{id}/status", get(job_status::<S, Q, B>))
        .route("/jobs/{id}/results", get(job_results::<S, Q, B>))
        .route("/jobs/{id}", delete(cancel_job::<S, Q, B>))
        .route("/health", get(health::<S, Q, B>))
        .route("/ws", get(ws::ws_all::<S, Q, B>))
        .route("/ws/jobs/{id}", get(ws::ws_job::<S, Q, B>))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/jobs/submit",
    request_body = SubmitRequest,
    responses(
        (status = 201, description = "Job created", body = SubmitResponse),
        (status = 422, description = "Validation failure", body = crate::dto::ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn submit_job<S, Q, B>(
    State(state): State<Arc<AppState<S, Q, B>>>,
    axum::Json(body): axum::Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    S: Store,
    Q: WorkQueue,
    B: UpdatePublisher,
{
    let batch: Vec<ArticleDescriptor> = body.articles.into_iter().map(Into::into).collect();
    let job = state.jobs().submit(&batch).await?;

    let message = if job.new_articles == 0 {
        "Job completed - all articles from cache"
    } else {
        "Job submitted successfully"
    };

    let response = SubmitResponse {
        job_id: job.id,
        status: job.status.to_string(),
        total_articles: job.total_articles,
        new_articles: job.new_articles,
        cached_articles: job.cached_articles,
        message: message.to_string(),
    };

    Ok((StatusCode::CREATED, axum::Json(response)))
}

#[utoipa::path(
    get,
    path = "/jobs/{id}/status",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job status", body = JobStatusResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn job_status<S, Q, B>(
    State(state): State<Arc<AppState<S, Q, B>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    S: Store,
    Q: WorkQueue,
    B: UpdatePublisher,
{
    let job = state
        .store
        .get_job(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job not found: {id}")))?;

    Ok(axum::Json(JobStatusResponse::from(job)))
}

#[utoipa::path(
    get,
    path = "/jobs/{id}/results",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Per-article results", body = JobResultsResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn job_results<S, Q, B>(
    State(state): State<Arc<AppState<S, Q, B>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    S: Store,
    Q: WorkQueue,
    B: UpdatePublisher,
{
    let job = state
        .store
        .get_job(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job not found: {id}")))?;

    let articles = state.store.get_articles(&job.article_ids).await?;
    let mut by_id: HashMap<String, _> = articles
        .into_iter()
        .map(|article| (article.id.clone(), article))
        .collect();

    let mut results = Vec::new();
    let mut failed_articles = Vec::new();
    for article_id in &job.article_ids {
        let Some(article) = by_id.remove(article_id) else {
            continue;
        };
        match article.status {
            ArticleStatus::Scraped => {
                results.push(ArticleResult::from_article(article, job.created_at));
            }
            ArticleStatus::Failed => {
                failed_articles.push(FailedArticle {
                    url: article.url,
                    error: article
                        .error_message
                        .unwrap_or_else(|| "Unknown error".to_string()),
                    attempted_at: Some(article.updated_at),
                });
            }
            _ => {}
        }
    }

    let response = JobResultsResponse {
        job_id: job.id.clone(),
        status: job.status.to_string(),
        total_articles: job.total_articles,
        successful: results.len() as u32,
        failed: failed_articles.len() as u32,
        results,
        failed_articles,
    };

    Ok(axum::Json(response))
}

#[utoipa::path(
    delete,
    path = "/jobs/{id}",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job cancelled", body = CancelResponse),
        (status = 400, description = "Job already terminal", body = crate::dto::ErrorResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn cancel_job<S, Q, B>(
    State(state): State<Arc<AppState<S, Q, B>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    S: Store,
    Q: WorkQueue,
    B: UpdatePublisher,
{
    let (job, removed) = state.jobs().cancel(&id).await?;

    let response = CancelResponse {
        job_id: job.id,
        status: job.status.to_string(),
        removed_tasks: removed,
        message: format!("Job cancelled. Removed {removed} pending tasks."),
    };

    Ok(axum::Json(response))
}

#[utoipa::path(
    get,
    path = "/jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "Jobs, newest first", body = [JobStatusResponse]),
        (status = 422, description = "Bad status filter", body = crate::dto::ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn list_jobs<S, Q, B>(
    State(state): State<Arc<AppState<S, Q, B>>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    S: Store,
    Q: WorkQueue,
    B: UpdatePublisher,
{
    let status = query
        .status_filter
        .map(|raw| {
            raw.parse::<JobStatus>()
                .map_err(AppError::Validation)
        })
        .transpose()?;

    let limit = query.limit.unwrap_or(50).min(100);
    let skip = query.skip.unwrap_or(0);

    let jobs = state.store.list_jobs(status, limit, skip).await?;
    let response: Vec<JobStatusResponse> =
        jobs.into_iter().map(JobStatusResponse::from).collect();

    Ok(axum::Json(response))
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health<S, Q, B>(
    State(state): State<Arc<AppState<S, Q, B>>>,
) -> impl IntoResponse
where
    S: Store,
    Q: WorkQueue,
    B: UpdatePublisher,
{
    let db_status = match state.store.ping().await {
        Ok(()) => "ok",
        Err(_) => "error",
    };

    let status = if db_status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if db_status == "ok" {
            "healthy"
        } else {
            "unhealthy"
        },
        database: db_status,
    };

    (status, axum::Json(response))
}
