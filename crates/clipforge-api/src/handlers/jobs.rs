//! Job submission, polling, listing and cancellation.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use clipforge_models::{BlobId, Job, JobId, JobOptions, JobStatus, JobType};
use clipforge_store::JobListFilter;

use crate::auth::AuthPrincipal;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub blob_id: String,
    /// Unknown option keys are ignored, not rejected.
    #[serde(default)]
    pub options: Value,
}

#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub job_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "type")]
    pub job_type: Option<String>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<Job>,
    pub limit: u32,
    pub offset: u32,
}

/// POST /jobs
pub async fn create_job(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<CreateJobResponse>)> {
    // Deserializing through Value drops unknown keys without erroring;
    // known keys with invalid values are still rejected.
    let options: JobOptions = serde_json::from_value(request.options)
        .map_err(|e| ApiError::bad_request(format!("invalid options: {}", e)))?;

    let job_id = state
        .scheduler
        .submit(&principal, BlobId::from_hex(request.blob_id), options)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateJobResponse {
            job_id: job_id.to_string(),
        }),
    ))
}

/// GET /jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = state
        .scheduler
        .status(&JobId::from_string(job_id), &principal)
        .await?;
    Ok(Json(job))
}

/// GET /jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<ListJobsResponse>> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            s.parse::<JobStatus>()
                .map_err(|e| ApiError::bad_request(e.to_string()))
        })
        .transpose()?;
    let job_type = query
        .job_type
        .as_deref()
        .map(|s| {
            s.parse::<JobType>()
                .map_err(|e| ApiError::bad_request(e.to_string()))
        })
        .transpose()?;

    let filter = JobListFilter {
        status,
        job_type,
        created_after: query.from,
        created_before: query.to,
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
    };

    let jobs = state.store.jobs.list(&principal.id, &filter).await?;

    Ok(Json(ListJobsResponse {
        jobs,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

/// POST /jobs/:id/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(job_id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .scheduler
        .cancel(&JobId::from_string(job_id), &principal)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
