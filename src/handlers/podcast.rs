//! Podcast generation endpoints: submit, poll, fetch, list, delete,
//! cancel, regenerate.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::AppState;
use crate::middleware::AuthUser;
use crate::models::{
    GenerateRequest, GenerationStatusResponse, JobStatus, PodcastListItem, PodcastListResponse,
    PodcastResponse,
};
use crate::utils::{ApiError, ApiResult};

/// Start generating a podcast for a location or question
#[utoipa::path(
    post,
    path = "/api/podcasts/generate",
    request_body = GenerateRequest,
    responses(
        (status = 202, description = "Generation started", body = GenerationStatusResponse),
        (status = 400, description = "Invalid request")
    ),
    security(("bearer_auth" = [])),
    tag = "Podcasts"
)]
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<GenerateRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()
        .map_err(|e| ApiError::bad_request(format!("Invalid generation request: {}", e)))?;

    tracing::info!(
        "Generation requested by user {}: '{}' ({})",
        auth.user_id,
        req.query,
        req.podcast_type.as_str()
    );

    let job = state
        .jobs
        .create(auth.user_id, &req.query, req.podcast_type, req.preferences.as_ref())
        .await?;
    state.jobs.start(&job.id, auth.tier).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerationStatusResponse {
            job_id: job.id.clone(),
            status: JobStatus::Processing,
            message: "Podcast generation started".to_string(),
            podcast_id: job.id,
            progress: 0,
        }),
    ))
}

/// Poll a generation job
#[utoipa::path(
    get,
    path = "/api/podcasts/status/{job_id}",
    params(("job_id" = String, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job status", body = GenerationStatusResponse),
        (status = 404, description = "Job not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Podcasts"
)]
pub async fn status(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let job = state
        .jobs
        .repository()
        .get(&job_id, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Podcast not found"))?;

    let message = job
        .error_message
        .clone()
        .unwrap_or_else(|| match job.status_enum() {
            JobStatus::Completed => "Generation complete".to_string(),
            JobStatus::Cancelled => "Generation cancelled".to_string(),
            _ => "Generation in progress".to_string(),
        });

    Ok(Json(GenerationStatusResponse {
        job_id: job.id.clone(),
        status: job.status_enum(),
        message,
        podcast_id: job.id.clone(),
        progress: job.progress.clamp(0, 100) as u8,
    }))
}

/// Fetch a podcast with its ranked candidate set
#[utoipa::path(
    get,
    path = "/api/podcasts/{id}",
    params(("id" = String, Path, description = "Podcast id")),
    responses(
        (status = 200, description = "Podcast", body = PodcastResponse),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Podcasts"
)]
pub async fn get_podcast(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let job = state
        .jobs
        .repository()
        .get(&id, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Podcast not found"))?;

    Ok(Json(PodcastResponse::from(&job)))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub status_filter: Option<String>,
}

fn default_limit() -> i64 {
    20
}

/// List the caller's podcasts
#[utoipa::path(
    get,
    path = "/api/podcasts",
    params(
        ("skip" = Option<i64>, Query, description = "Records to skip"),
        ("limit" = Option<i64>, Query, description = "Page size, max 100"),
        ("status_filter" = Option<String>, Query, description = "Filter by status")
    ),
    responses((status = 200, description = "Podcast library", body = PodcastListResponse)),
    security(("bearer_auth" = [])),
    tag = "Podcasts"
)]
pub async fn list_podcasts(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Query(params): Query<ListParams>,
) -> ApiResult<impl IntoResponse> {
    let skip = params.skip.max(0);
    let limit = params.limit.clamp(1, 100);
    let status_filter = params
        .status_filter
        .as_deref()
        .map(JobStatus::parse_status);

    let repo = state.jobs.repository();
    let jobs = repo.list_by_owner(auth.user_id, skip, limit, status_filter).await?;
    let total = repo.count_by_owner(auth.user_id, status_filter).await?;

    Ok(Json(PodcastListResponse {
        podcasts: jobs.iter().map(PodcastListItem::from).collect(),
        total,
        skip,
        limit,
    }))
}

/// Delete a podcast
#[utoipa::path(
    delete,
    path = "/api/podcasts/{id}",
    params(("id" = String, Path, description = "Podcast id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Podcasts"
)]
pub async fn delete_podcast(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    // Stop any in-flight work first; a no-op for finished jobs
    let _ = state.jobs.cancel(&id, auth.user_id).await;

    let deleted = state.jobs.repository().delete(&id, auth.user_id).await?;
    if !deleted {
        return Err(ApiError::not_found("Podcast not found"));
    }

    tracing::info!("Podcast {} deleted by user {}", id, auth.user_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Cancel a running generation job
#[utoipa::path(
    post,
    path = "/api/podcasts/{id}/cancel",
    params(("id" = String, Path, description = "Podcast id")),
    responses(
        (status = 200, description = "Cancellation state", body = GenerationStatusResponse),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Podcasts"
)]
pub async fn cancel_podcast(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.jobs.cancel(&id, auth.user_id).await?;

    let job = state
        .jobs
        .repository()
        .get(&id, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Podcast not found"))?;

    Ok(Json(GenerationStatusResponse {
        job_id: job.id.clone(),
        status: job.status_enum(),
        message: "Cancellation requested".to_string(),
        podcast_id: job.id.clone(),
        progress: job.progress.clamp(0, 100) as u8,
    }))
}

/// Regenerate with the stored query. Creates a fresh job so the original
/// keeps its terminal state and history.
#[utoipa::path(
    post,
    path = "/api/podcasts/{id}/regenerate",
    params(("id" = String, Path, description = "Podcast id")),
    responses(
        (status = 202, description = "Regeneration started", body = GenerationStatusResponse),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Podcasts"
)]
pub async fn regenerate(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let original = state
        .jobs
        .repository()
        .get(&id, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Podcast not found"))?;

    let preferences = original.preferences();
    let job = state
        .jobs
        .create(
            auth.user_id,
            &original.query_text,
            original.kind_enum(),
            preferences.as_ref(),
        )
        .await?;
    state.jobs.start(&job.id, auth.tier).await?;

    tracing::info!("Podcast {} regenerated as {} by user {}", id, job.id, auth.user_id);

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerationStatusResponse {
            job_id: job.id.clone(),
            status: JobStatus::Processing,
            message: "Podcast regeneration started".to_string(),
            podcast_id: job.id,
            progress: 0,
        }),
    ))
}
