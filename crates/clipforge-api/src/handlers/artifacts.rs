//! Artifact listing and retrieval.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use tokio_util::io::ReaderStream;

use clipforge_models::{ArtifactId, ClipArtifact, JobId};

use crate::auth::AuthPrincipal;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Artifact descriptor with its retrieval URL.
#[derive(Debug, Serialize)]
pub struct ArtifactResponse {
    pub id: String,
    pub job_id: String,
    pub ordinal: u32,
    pub duration: f64,
    pub source_start: f64,
    pub source_end: f64,
    pub aspect_ratio: String,
    pub captions_added: bool,
    pub viral_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption_track_id: Option<String>,
    pub url: String,
}

impl From<ClipArtifact> for ArtifactResponse {
    fn from(artifact: ClipArtifact) -> Self {
        Self {
            url: format!("/artifacts/{}/download", artifact.id),
            id: artifact.id.to_string(),
            job_id: artifact.job_id.to_string(),
            ordinal: artifact.ordinal,
            duration: artifact.duration,
            source_start: artifact.source_start,
            source_end: artifact.source_end,
            aspect_ratio: artifact.aspect_ratio.as_str().to_string(),
            captions_added: artifact.captions_added,
            viral_score: artifact.viral_score,
            caption_track_id: artifact.caption_track_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListArtifactsResponse {
    pub artifacts: Vec<ArtifactResponse>,
}

/// GET /jobs/:id/artifacts
pub async fn list_job_artifacts(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ListArtifactsResponse>> {
    let job_id = JobId::from_string(job_id);
    // Ownership gate before touching the registry.
    state.store.jobs.get_owned(&job_id, &principal.id).await?;

    let artifacts = state.store.artifacts.list_by_job(&job_id).await?;
    Ok(Json(ListArtifactsResponse {
        artifacts: artifacts.into_iter().map(Into::into).collect(),
    }))
}

/// GET /artifacts/:id
pub async fn get_artifact(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(artifact_id): Path<String>,
) -> ApiResult<Json<ArtifactResponse>> {
    let artifact = state
        .store
        .artifacts
        .get_owned(&ArtifactId::from_string(artifact_id), &principal.id)
        .await?;
    Ok(Json(artifact.into()))
}

/// GET /artifacts/:id/download — stream the final clip from the blob store.
pub async fn download_artifact(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(artifact_id): Path<String>,
) -> ApiResult<Response> {
    let artifact = state
        .store
        .artifacts
        .get_owned(&ArtifactId::from_string(artifact_id), &principal.id)
        .await?;

    let meta = state.store.blobs.meta(&artifact.blob_id).await?;
    let file = state.store.blobs.open(&artifact.blob_id).await?;

    let job = state.store.jobs.get(&artifact.job_id).await?;
    let filename = artifact.file_name(&job.options.target_platforms);

    let body = Body::from_stream(ReaderStream::new(file));
    Response::builder()
        .header(header::CONTENT_TYPE, meta.content_type)
        .header(header::CONTENT_LENGTH, meta.size)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(body)
        .map_err(|e| ApiError::internal(format!("failed to build response: {}", e)))
}
