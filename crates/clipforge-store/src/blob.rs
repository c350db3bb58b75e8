//! Content-addressed blob storage.
//!
//! Blob files live on disk under `blobs/<first-two-hex>/<digest>`; metadata
//! and reference counts live in the `blobs` table. Writes are idempotent:
//! storing bytes that hash to an existing digest bumps the refcount.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tokio::io::AsyncReadExt;
use tracing::debug;

use clipforge_models::BlobId;

use crate::error::{StoreError, StoreResult};

/// Blob metadata row.
#[derive(Debug, Clone)]
pub struct BlobMeta {
    pub id: BlobId,
    pub size: u64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub refcount: i64,
}

/// Content-addressed, write-once file store.
pub struct BlobStore {
    root: PathBuf,
    pool: SqlitePool,
}

impl BlobStore {
    /// Create a blob store rooted at `root`.
    pub async fn new(root: PathBuf, pool: SqlitePool) -> StoreResult<Self> {
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root, pool })
    }

    /// Path a blob id maps to on disk.
    pub fn path_for(&self, id: &BlobId) -> PathBuf {
        let shard = &id.as_str()[..2.min(id.as_str().len())];
        self.root.join(shard).join(id.as_str())
    }

    /// Compute the streaming SHA-256 digest of a file.
    pub async fn digest_file(path: &Path) -> StoreResult<(BlobId, u64)> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        let mut size = 0u64;

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }

        Ok((BlobId::from_hex(hex::encode(hasher.finalize())), size))
    }

    /// Store a file under its content digest and take one reference.
    ///
    /// The source file is moved into place; if an identical blob already
    /// exists the source is discarded and the refcount incremented.
    pub async fn store_file(
        &self,
        src: &Path,
        content_type: &str,
    ) -> StoreResult<(BlobId, u64)> {
        let (id, size) = Self::digest_file(src).await?;
        let dest = self.path_for(&id);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if tokio::fs::try_exists(&dest).await? {
            tokio::fs::remove_file(src).await.ok();
        } else {
            // Rename within the same filesystem; fall back to copy.
            if tokio::fs::rename(src, &dest).await.is_err() {
                tokio::fs::copy(src, &dest).await?;
                tokio::fs::remove_file(src).await.ok();
            }
        }

        sqlx::query(
            "INSERT INTO blobs (id, size, content_type, created_at, refcount)
             VALUES (?, ?, ?, ?, 1)
             ON CONFLICT(id) DO UPDATE SET refcount = refcount + 1",
        )
        .bind(id.as_str())
        .bind(size as i64)
        .bind(content_type)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(blob_id = %id, size, content_type, "stored blob");
        Ok((id, size))
    }

    /// Fetch blob metadata.
    pub async fn meta(&self, id: &BlobId) -> StoreResult<BlobMeta> {
        let row = sqlx::query(
            "SELECT id, size, content_type, created_at, refcount FROM blobs WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("blob {}", id)))?;

        Ok(BlobMeta {
            id: BlobId::from_hex(row.get::<String, _>("id")),
            size: row.get::<i64, _>("size") as u64,
            content_type: row.get("content_type"),
            created_at: row.get("created_at"),
            refcount: row.get("refcount"),
        })
    }

    /// Whether a blob exists.
    pub async fn exists(&self, id: &BlobId) -> StoreResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blobs WHERE id = ?")
            .bind(id.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Open a blob's file for reading.
    pub async fn open(&self, id: &BlobId) -> StoreResult<tokio::fs::File> {
        // Row check first so a missing row and a missing file report the same way.
        self.meta(id).await?;
        Ok(tokio::fs::File::open(self.path_for(id)).await?)
    }

    /// Take an additional reference on a blob.
    pub async fn add_ref(&self, id: &BlobId) -> StoreResult<()> {
        let updated = sqlx::query("UPDATE blobs SET refcount = refcount + 1 WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(StoreError::not_found(format!("blob {}", id)));
        }
        Ok(())
    }

    /// Release one reference; the file and row are removed at zero.
    pub async fn release(&self, id: &BlobId) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let refcount: Option<i64> = sqlx::query_scalar("SELECT refcount FROM blobs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        match refcount {
            None => {
                tx.rollback().await?;
                Ok(())
            }
            Some(n) if n <= 1 => {
                sqlx::query("DELETE FROM blobs WHERE id = ?")
                    .bind(id.as_str())
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                tokio::fs::remove_file(self.path_for(id)).await.ok();
                debug!(blob_id = %id, "released last reference, blob removed");
                Ok(())
            }
            Some(_) => {
                sqlx::query("UPDATE blobs SET refcount = refcount - 1 WHERE id = ?")
                    .bind(id.as_str())
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok(())
            }
        }
    }
}
