//! Resumable chunked upload sessions.
//!
//! A session stages chunks as per-index files under `uploads/<id>/` and
//! tracks receipt in a bitmap column. `complete` streams the chunks in index
//! order through a SHA-256 hasher into the blob store, so the resulting blob
//! id is the content digest regardless of chunk arrival order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use clipforge_models::{BlobId, UploadId};

use crate::blob::BlobStore;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::sniff;

/// Bounds accepted for a client-requested chunk size.
const MIN_CHUNK_SIZE: u64 = 64 * 1024;
const MAX_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

/// An open upload session as returned by `init`.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub id: UploadId,
    pub principal_id: String,
    pub filename: String,
    pub size: u64,
    pub declared_type: String,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub received_bitmap: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    /// Expected byte length of the chunk at `index`.
    pub fn expected_chunk_len(&self, index: u64) -> u64 {
        if index + 1 == self.total_chunks {
            self.size - self.chunk_size * (self.total_chunks - 1)
        } else {
            self.chunk_size
        }
    }

    pub fn received_count(&self) -> u64 {
        count_set(&self.received_bitmap)
    }

    pub fn is_complete(&self) -> bool {
        self.received_count() == self.total_chunks
    }
}

/// Receipt returned from a chunk write.
#[derive(Debug, Clone)]
pub struct ChunkReceipt {
    pub index: u64,
    pub received: u64,
    pub total: u64,
}

/// Progress summary for a session.
#[derive(Debug, Clone)]
pub struct UploadStatus {
    pub id: UploadId,
    pub filename: String,
    pub received: u64,
    pub total: u64,
    pub expires_at: DateTime<Utc>,
}

/// The upload assembler.
#[derive(Clone)]
pub struct UploadAssembler {
    config: StoreConfig,
    pool: SqlitePool,
    blobs: Arc<BlobStore>,
    /// Per-session critical sections guarding bitmap updates.
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl UploadAssembler {
    pub async fn new(
        config: StoreConfig,
        pool: SqlitePool,
        blobs: Arc<BlobStore>,
    ) -> StoreResult<Self> {
        tokio::fs::create_dir_all(config.upload_dir()).await?;
        Ok(Self {
            config,
            pool,
            blobs,
            locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Initialize an upload session.
    pub async fn init(
        &self,
        principal_id: &str,
        filename: &str,
        size: u64,
        content_type: &str,
        requested_chunk_size: Option<u64>,
    ) -> StoreResult<UploadSession> {
        if size == 0 {
            return Err(StoreError::invalid("declared size must be positive"));
        }
        if size > self.config.max_upload_bytes {
            return Err(StoreError::Oversize {
                size,
                max: self.config.max_upload_bytes,
            });
        }
        if !sniff::extension_allowed(filename) {
            return Err(StoreError::rejected_type(format!(
                "extension of '{}' is not an accepted video type",
                filename
            )));
        }
        if !sniff::declared_type_acceptable(content_type) {
            return Err(StoreError::rejected_type(format!(
                "declared content type '{}' is not acceptable for a video upload",
                content_type
            )));
        }

        let chunk_size = match requested_chunk_size {
            None => self.config.default_chunk_size,
            Some(s) if (MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&s) => s,
            Some(s) => {
                return Err(StoreError::invalid(format!(
                    "chunk size {} outside accepted range [{}, {}]",
                    s, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
                )))
            }
        };

        let total_chunks = size.div_ceil(chunk_size);
        let now = Utc::now();
        let expires_at = now
            + ChronoDuration::from_std(self.config.upload_ttl)
                .unwrap_or_else(|_| ChronoDuration::hours(24));

        let session = UploadSession {
            id: UploadId::new(),
            principal_id: principal_id.to_string(),
            filename: filename.to_string(),
            size,
            declared_type: content_type.to_string(),
            chunk_size,
            total_chunks,
            received_bitmap: vec![0u8; total_chunks.div_ceil(8) as usize],
            expires_at,
        };

        sqlx::query(
            "INSERT INTO uploads
                (id, principal_id, filename, size, declared_type, chunk_size,
                 total_chunks, received_bitmap, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id.as_str())
        .bind(&session.principal_id)
        .bind(&session.filename)
        .bind(session.size as i64)
        .bind(&session.declared_type)
        .bind(session.chunk_size as i64)
        .bind(session.total_chunks as i64)
        .bind(&session.received_bitmap)
        .bind(session.expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tokio::fs::create_dir_all(self.session_dir(&session.id)).await?;

        info!(
            upload_id = %session.id,
            principal = principal_id,
            filename,
            size,
            total_chunks,
            "initialized upload session"
        );

        Ok(session)
    }

    /// Write one chunk. Rewriting an index with the same length is a no-op
    /// success; a differing length is a conflict.
    pub async fn write_chunk(
        &self,
        principal_id: &str,
        upload_id: &UploadId,
        index: u64,
        bytes: &[u8],
    ) -> StoreResult<ChunkReceipt> {
        let lock = self.session_lock(upload_id).await;
        let _guard = lock.lock().await;

        let mut session = self.load_owned(principal_id, upload_id).await?;

        if index >= session.total_chunks {
            return Err(StoreError::invalid(format!(
                "chunk index {} out of range (total {})",
                index, session.total_chunks
            )));
        }

        let expected = session.expected_chunk_len(index);
        if bytes.len() as u64 != expected {
            // An identical-length rewrite of a received chunk is idempotent;
            // everything else with a wrong length is a hard error.
            if bit_set(&session.received_bitmap, index) {
                return Err(StoreError::conflict(format!(
                    "chunk {} already received with length {}",
                    index, expected
                )));
            }
            return Err(StoreError::invalid(format!(
                "chunk {} has length {}, expected {}",
                index,
                bytes.len(),
                expected
            )));
        }

        if bit_set(&session.received_bitmap, index) {
            debug!(upload_id = %upload_id, index, "duplicate chunk accepted as no-op");
            return Ok(ChunkReceipt {
                index,
                received: session.received_count(),
                total: session.total_chunks,
            });
        }

        let path = self.chunk_path(upload_id, index);
        let tmp = path.with_extension("part");
        {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
        }
        tokio::fs::rename(&tmp, &path).await?;

        set_bit(&mut session.received_bitmap, index);
        sqlx::query("UPDATE uploads SET received_bitmap = ? WHERE id = ?")
            .bind(&session.received_bitmap)
            .bind(upload_id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(ChunkReceipt {
            index,
            received: session.received_count(),
            total: session.total_chunks,
        })
    }

    /// Assemble the session into a blob and delete the session.
    pub async fn complete(
        &self,
        principal_id: &str,
        upload_id: &UploadId,
    ) -> StoreResult<(BlobId, u64, String)> {
        let lock = self.session_lock(upload_id).await;
        let _guard = lock.lock().await;

        let session = self.load_owned(principal_id, upload_id).await?;

        let missing = session.total_chunks - session.received_count();
        if missing > 0 {
            return Err(StoreError::Incomplete {
                missing: missing as usize,
            });
        }

        // Stream chunks in index order into a staging file.
        let staging = self.session_dir(upload_id).join("assembled");
        let mut out = tokio::fs::File::create(&staging).await?;
        let mut head = Vec::with_capacity(sniff::SNIFF_LEN);

        for index in 0..session.total_chunks {
            let mut chunk = tokio::fs::File::open(self.chunk_path(upload_id, index)).await?;
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = chunk.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                if head.len() < sniff::SNIFF_LEN {
                    let take = (sniff::SNIFF_LEN - head.len()).min(n);
                    head.extend_from_slice(&buf[..take]);
                }
                out.write_all(&buf[..n]).await?;
            }
        }
        out.flush().await?;
        drop(out);

        let detected = sniff::detect_content_type(&head).ok_or_else(|| {
            StoreError::rejected_type("leading bytes do not match a supported video container")
        })?;

        let (blob_id, size) = self.blobs.store_file(&staging, detected).await?;

        if size != session.size {
            // The per-chunk length checks make this unreachable short of
            // on-disk corruption; surface it rather than register a bad blob.
            self.blobs.release(&blob_id).await.ok();
            return Err(StoreError::conflict(format!(
                "assembled size {} does not match declared size {}",
                size, session.size
            )));
        }

        self.delete_session(upload_id).await?;

        info!(
            upload_id = %upload_id,
            blob_id = %blob_id,
            size,
            content_type = detected,
            "upload completed"
        );

        Ok((blob_id, size, detected.to_string()))
    }

    /// Abort a session and delete its staged chunks.
    pub async fn abort(&self, principal_id: &str, upload_id: &UploadId) -> StoreResult<()> {
        let lock = self.session_lock(upload_id).await;
        let _guard = lock.lock().await;

        self.load_owned(principal_id, upload_id).await?;
        self.delete_session(upload_id).await?;
        info!(upload_id = %upload_id, "upload aborted");
        Ok(())
    }

    /// Progress summary for a session.
    pub async fn status(
        &self,
        principal_id: &str,
        upload_id: &UploadId,
    ) -> StoreResult<UploadStatus> {
        let session = self.load_owned(principal_id, upload_id).await?;
        Ok(UploadStatus {
            id: session.id.clone(),
            filename: session.filename.clone(),
            received: session.received_count(),
            total: session.total_chunks,
            expires_at: session.expires_at,
        })
    }

    /// Delete sessions past their TTL. Returns the number removed.
    pub async fn sweep_expired(&self) -> StoreResult<usize> {
        let now = Utc::now();
        let rows = sqlx::query("SELECT id FROM uploads WHERE expires_at < ?")
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        let mut removed = 0;
        for row in rows {
            let id = UploadId::from_string(row.get::<String, _>("id"));
            if let Err(e) = self.delete_session(&id).await {
                warn!(upload_id = %id, error = %e, "failed to remove expired upload");
                continue;
            }
            removed += 1;
        }

        if removed > 0 {
            info!(removed, "swept expired upload sessions");
        }
        Ok(removed)
    }

    fn session_dir(&self, upload_id: &UploadId) -> PathBuf {
        self.config.upload_dir().join(upload_id.as_str())
    }

    fn chunk_path(&self, upload_id: &UploadId, index: u64) -> PathBuf {
        self.session_dir(upload_id)
            .join(format!("chunk_{:06}", index))
    }

    async fn session_lock(&self, upload_id: &UploadId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(upload_id.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load_owned(
        &self,
        principal_id: &str,
        upload_id: &UploadId,
    ) -> StoreResult<UploadSession> {
        let row = sqlx::query(
            "SELECT id, principal_id, filename, size, declared_type, chunk_size,
                    total_chunks, received_bitmap, expires_at
             FROM uploads WHERE id = ?",
        )
        .bind(upload_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("upload session {}", upload_id)))?;

        let session = UploadSession {
            id: UploadId::from_string(row.get::<String, _>("id")),
            principal_id: row.get("principal_id"),
            filename: row.get("filename"),
            size: row.get::<i64, _>("size") as u64,
            declared_type: row.get("declared_type"),
            chunk_size: row.get::<i64, _>("chunk_size") as u64,
            total_chunks: row.get::<i64, _>("total_chunks") as u64,
            received_bitmap: row.get("received_bitmap"),
            expires_at: row.get("expires_at"),
        };

        if session.principal_id != principal_id {
            return Err(StoreError::forbidden("upload session belongs to another principal"));
        }
        if session.expires_at < Utc::now() {
            return Err(StoreError::Expired(upload_id.to_string()));
        }

        Ok(session)
    }

    async fn delete_session(&self, upload_id: &UploadId) -> StoreResult<()> {
        sqlx::query("DELETE FROM uploads WHERE id = ?")
            .bind(upload_id.as_str())
            .execute(&self.pool)
            .await?;
        tokio::fs::remove_dir_all(self.session_dir(upload_id)).await.ok();

        let mut locks = self.locks.lock().await;
        locks.remove(upload_id.as_str());
        Ok(())
    }
}

fn bit_set(bitmap: &[u8], index: u64) -> bool {
    let byte = (index / 8) as usize;
    let bit = (index % 8) as u8;
    bitmap
        .get(byte)
        .map(|b| b & (1 << bit) != 0)
        .unwrap_or(false)
}

fn set_bit(bitmap: &mut [u8], index: u64) {
    let byte = (index / 8) as usize;
    let bit = (index % 8) as u8;
    if let Some(b) = bitmap.get_mut(byte) {
        *b |= 1 << bit;
    }
}

fn count_set(bitmap: &[u8]) -> u64 {
    bitmap.iter().map(|b| b.count_ones() as u64).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_roundtrip() {
        let mut bitmap = vec![0u8; 2];
        assert!(!bit_set(&bitmap, 0));

        set_bit(&mut bitmap, 0);
        set_bit(&mut bitmap, 9);
        assert!(bit_set(&bitmap, 0));
        assert!(bit_set(&bitmap, 9));
        assert!(!bit_set(&bitmap, 1));
        assert_eq!(count_set(&bitmap), 2);
    }

    #[test]
    fn bitmap_out_of_range_reads_false() {
        let bitmap = vec![0xFFu8];
        assert!(bit_set(&bitmap, 7));
        assert!(!bit_set(&bitmap, 8));
    }

    #[test]
    fn expected_chunk_len_handles_remainder() {
        let session = UploadSession {
            id: UploadId::new(),
            principal_id: "p".into(),
            filename: "a.mp4".into(),
            size: 2_500_000,
            declared_type: "video/mp4".into(),
            chunk_size: 1_000_000,
            total_chunks: 3,
            received_bitmap: vec![0; 1],
            expires_at: Utc::now(),
        };
        assert_eq!(session.expected_chunk_len(0), 1_000_000);
        assert_eq!(session.expected_chunk_len(1), 1_000_000);
        assert_eq!(session.expected_chunk_len(2), 500_000);
    }

    #[test]
    fn expected_chunk_len_exact_multiple() {
        let session = UploadSession {
            id: UploadId::new(),
            principal_id: "p".into(),
            filename: "a.mp4".into(),
            size: 2_000_000,
            declared_type: "video/mp4".into(),
            chunk_size: 1_000_000,
            total_chunks: 2,
            received_bitmap: vec![0; 1],
            expires_at: Utc::now(),
        };
        assert_eq!(session.expected_chunk_len(1), 1_000_000);
    }
}
