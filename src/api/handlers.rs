use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    db::JobStore,
    error::{AppError, AppResult},
    middleware::RequestId,
    models::{Job, JobType, TitleKind},
    services::{
        catalog::{discover_by_languages, DiscoverFilter, PrioritizedResult},
        jobs::{
            enrich_details::{self, EnrichReport, EnrichRequest},
            enrich_trailers,
            fix_streaming::{self, FixStreamingReport, FixStreamingRequest},
            full_refresh::{self, FullRefreshRequest, FullRefreshResponse},
            orchestrator::{self, OrchestratorAccepted, OrchestratorRequest},
            retry_sweeper::{self, RetryReport},
            sync_delta::{self, SyncDeltaRequest, SyncDeltaResponse},
        },
    },
};

use super::AppState;

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// All job rows
pub async fn list_jobs(State(state): State<AppState>) -> AppResult<Json<Vec<Job>>> {
    let jobs = state.store().list_jobs().await?;
    Ok(Json(jobs))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
) -> AppResult<Json<Job>> {
    let job_type: JobType = job_type.parse().map_err(AppError::NotFound)?;
    let job = state.store().get_job(job_type).await?;
    Ok(Json(job))
}

pub async fn full_refresh_orchestrator(
    State(state): State<AppState>,
    Json(request): Json<OrchestratorRequest>,
) -> AppResult<Json<OrchestratorAccepted>> {
    let accepted = orchestrator::start(&state.pipeline, request).await?;
    Ok(Json(accepted))
}

pub async fn full_refresh_titles(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<FullRefreshRequest>,
) -> AppResult<Json<FullRefreshResponse>> {
    let response = full_refresh::run(&state.pipeline, request, Some(request_id.to_string())).await?;
    Ok(Json(response))
}

pub async fn sync_titles_delta(
    State(state): State<AppState>,
    request: Option<Json<SyncDeltaRequest>>,
) -> AppResult<Json<SyncDeltaResponse>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let response = sync_delta::run(&state.pipeline, request).await?;
    Ok(Json(response))
}

pub async fn enrich_title_details(
    State(state): State<AppState>,
    request: Option<Json<EnrichRequest>>,
) -> AppResult<Json<EnrichReport>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let report = enrich_details::run(&state.pipeline, request).await?;
    Ok(Json(report))
}

pub async fn enrich_title_trailers(
    State(state): State<AppState>,
    request: Option<Json<EnrichRequest>>,
) -> AppResult<Json<EnrichReport>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let report = enrich_trailers::run(&state.pipeline, request).await?;
    Ok(Json(report))
}

pub async fn fix_streaming_availability(
    State(state): State<AppState>,
    request: Option<Json<FixStreamingRequest>>,
) -> AppResult<Json<FixStreamingReport>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let report = fix_streaming::run(&state.pipeline, request).await?;
    Ok(Json(report))
}

pub async fn retry_failed_threads(State(state): State<AppState>) -> AppResult<Json<RetryReport>> {
    let report = retry_sweeper::run(&state.pipeline).await?;
    Ok(Json(report))
}

fn default_limit() -> usize {
    20
}

fn default_media_type() -> String {
    "movie".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverRequest {
    /// Original languages in priority order
    pub languages: Vec<String>,
    #[serde(default = "default_media_type")]
    pub media_type: String,
    #[serde(default)]
    pub genre_id: Option<i64>,
    #[serde(default)]
    pub min_rating: f64,
    #[serde(default)]
    pub min_vote_count: i64,
    #[serde(default)]
    pub streaming_provider_ids: Vec<i64>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct DiscoverResponse {
    pub success: bool,
    pub results: Vec<PrioritizedResult>,
    pub total: usize,
}

/// Catalog discover across several languages, merged by language priority
pub async fn discover_tmdb(
    State(state): State<AppState>,
    Json(request): Json<DiscoverRequest>,
) -> AppResult<Json<DiscoverResponse>> {
    if request.languages.is_empty() {
        return Err(AppError::InvalidInput("languages must not be empty".to_string()));
    }
    let media_type: TitleKind = request.media_type.parse().map_err(AppError::InvalidInput)?;

    let filter = DiscoverFilter {
        genre_id: request.genre_id,
        min_rating: request.min_rating,
        min_vote_count: request.min_vote_count,
        streaming_provider_ids: request.streaming_provider_ids,
        region: request.region,
        ..DiscoverFilter::new(media_type)
    };

    let results = discover_by_languages(
        state.pipeline.catalog.as_ref(),
        &filter,
        &request.languages,
        request.limit,
    )
    .await;

    Ok(Json(DiscoverResponse {
        success: true,
        total: results.len(),
        results,
    }))
}
