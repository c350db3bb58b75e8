//! API routes.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::artifacts::{download_artifact, get_artifact, list_job_artifacts};
use crate::handlers::events::job_events;
use crate::handlers::jobs::{cancel_job, create_job, get_job, list_jobs};
use crate::handlers::upload::{
    abort_upload, complete_upload, init_upload, upload_chunk, upload_status,
};
use crate::handlers::{health, ready};
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, RateLimiterCache,
};
use crate::state::AppState;

/// Largest accepted chunk request body: chunk size cap plus form overhead.
const CHUNK_BODY_LIMIT: usize = 24 * 1024 * 1024;

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    let upload_routes = Router::new()
        .route("/upload/init", post(init_upload))
        .route(
            "/upload/chunk/:upload_id",
            post(upload_chunk).layer(DefaultBodyLimit::max(CHUNK_BODY_LIMIT)),
        )
        .route("/upload/complete/:upload_id", post(complete_upload))
        .route("/upload/abort/:upload_id", post(abort_upload))
        .route("/upload/:upload_id/status", get(upload_status));

    let job_routes = Router::new()
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/cancel", post(cancel_job))
        .route("/jobs/:job_id/events", get(job_events))
        .route("/jobs/:job_id/artifacts", get(list_job_artifacts));

    let artifact_routes = Router::new()
        .route("/artifacts/:artifact_id", get(get_artifact))
        .route("/artifacts/:artifact_id/download", get(download_artifact));

    let rate_limiter = Arc::new(RateLimiterCache::new(state.config.rate_limit_rps));

    let api_routes = Router::new()
        .merge(upload_routes)
        .merge(job_routes)
        .merge(artifact_routes)
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    Router::new()
        .merge(api_routes)
        .merge(health_routes)
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
