use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::{make_span_with_request_id, request_id_middleware};
use crate::services::jobs::{
    ENRICH_TITLE_DETAILS, ENRICH_TITLE_TRAILERS, FIX_STREAMING_AVAILABILITY,
    FULL_REFRESH_ORCHESTRATOR, FULL_REFRESH_TITLES, RETRY_FAILED_THREADS, SYNC_TITLES_DELTA,
};

use super::handlers;
use super::AppState;

fn function_path(name: &str) -> String {
    format!("/functions/{}", name)
}

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Job rows
        .route("/jobs", get(handlers::list_jobs))
        .route("/jobs/:job_type", get(handlers::get_job))
        // Worker invocations
        .route(
            &function_path(FULL_REFRESH_ORCHESTRATOR),
            post(handlers::full_refresh_orchestrator),
        )
        .route(
            &function_path(FULL_REFRESH_TITLES),
            post(handlers::full_refresh_titles),
        )
        .route(
            &function_path(SYNC_TITLES_DELTA),
            post(handlers::sync_titles_delta),
        )
        .route(
            &function_path(ENRICH_TITLE_DETAILS),
            post(handlers::enrich_title_details),
        )
        .route(
            &function_path(ENRICH_TITLE_TRAILERS),
            post(handlers::enrich_title_trailers),
        )
        .route(
            &function_path(FIX_STREAMING_AVAILABILITY),
            post(handlers::fix_streaming_availability),
        )
        .route(
            &function_path(RETRY_FAILED_THREADS),
            post(handlers::retry_failed_threads),
        )
        .route("/functions/discover-tmdb", post(handlers::discover_tmdb))
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
