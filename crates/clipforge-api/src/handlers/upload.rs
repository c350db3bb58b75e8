//! Chunked upload handlers.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use clipforge_models::UploadId;

use crate::auth::AuthPrincipal;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadInitRequest {
    pub filename: String,
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub chunk_size: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct UploadInitResponse {
    pub upload_id: String,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub expires_at: String,
}

#[derive(Debug, Serialize)]
pub struct ChunkUploadResponse {
    pub chunk_number: u64,
    pub received: u64,
    pub total: u64,
}

#[derive(Debug, Serialize)]
pub struct UploadCompleteResponse {
    pub blob_id: String,
    pub size: u64,
    pub content_type: String,
}

#[derive(Debug, Serialize)]
pub struct UploadStatusResponse {
    pub upload_id: String,
    pub filename: String,
    pub received: u64,
    pub total: u64,
    pub expires_at: String,
}

/// POST /upload/init
pub async fn init_upload(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(request): Json<UploadInitRequest>,
) -> ApiResult<(StatusCode, Json<UploadInitResponse>)> {
    let content_type = request
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let session = state
        .store
        .uploads
        .init(
            &principal.id,
            &request.filename,
            request.size,
            &content_type,
            request.chunk_size,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadInitResponse {
            upload_id: session.id.to_string(),
            chunk_size: session.chunk_size,
            total_chunks: session.total_chunks,
            expires_at: session.expires_at.to_rfc3339(),
        }),
    ))
}

/// POST /upload/chunk/:id — multipart form with `chunk_number` and `chunk`.
pub async fn upload_chunk(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(upload_id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<Json<ChunkUploadResponse>> {
    let mut chunk_number: Option<u64> = None;
    let mut chunk: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {}", e)))?
    {
        match field.name() {
            Some("chunk_number") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("bad chunk_number: {}", e)))?;
                chunk_number = Some(
                    text.parse()
                        .map_err(|_| ApiError::bad_request("chunk_number is not an integer"))?,
                );
            }
            Some("chunk") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("bad chunk body: {}", e)))?;
                chunk = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    let chunk_number =
        chunk_number.ok_or_else(|| ApiError::bad_request("missing field 'chunk_number'"))?;
    let chunk = chunk.ok_or_else(|| ApiError::bad_request("missing field 'chunk'"))?;

    let receipt = state
        .store
        .uploads
        .write_chunk(
            &principal.id,
            &UploadId::from_string(upload_id),
            chunk_number,
            &chunk,
        )
        .await?;

    Ok(Json(ChunkUploadResponse {
        chunk_number: receipt.index,
        received: receipt.received,
        total: receipt.total,
    }))
}

/// POST /upload/complete/:id
pub async fn complete_upload(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<UploadCompleteResponse>> {
    let (blob_id, size, content_type) = state
        .store
        .uploads
        .complete(&principal.id, &UploadId::from_string(upload_id))
        .await?;

    info!(principal = %principal.id, blob_id = %blob_id, "upload promoted to blob");

    Ok(Json(UploadCompleteResponse {
        blob_id: blob_id.to_string(),
        size,
        content_type,
    }))
}

/// POST /upload/abort/:id
pub async fn abort_upload(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(upload_id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .store
        .uploads
        .abort(&principal.id, &UploadId::from_string(upload_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /upload/:id/status
pub async fn upload_status(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<UploadStatusResponse>> {
    let status = state
        .store
        .uploads
        .status(&principal.id, &UploadId::from_string(upload_id))
        .await?;

    Ok(Json(UploadStatusResponse {
        upload_id: status.id.to_string(),
        filename: status.filename,
        received: status.received,
        total: status.total,
        expires_at: status.expires_at.to_rfc3339(),
    }))
}
