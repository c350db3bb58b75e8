//! Durable persistence for the clipforge pipeline.
//!
//! This crate owns:
//! - the content-addressed blob store (files on disk, metadata rows)
//! - the SQLite job store (jobs, progress, leases)
//! - resumable chunked upload sessions
//! - the artifact registry and persisted transcripts
//!
//! All handles are cheap to clone and share one connection pool.

pub mod artifact;
pub mod blob;
pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod sniff;
pub mod upload;

pub use artifact::ArtifactRegistry;
pub use blob::{BlobMeta, BlobStore};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use job::{JobListFilter, JobStore};
pub use upload::{ChunkReceipt, UploadAssembler, UploadSession, UploadStatus};

use std::sync::Arc;

use clipforge_models::{JobId, JobStatus};

/// All persistence handles, opened together in dependency order.
#[derive(Clone)]
pub struct Store {
    pub blobs: Arc<BlobStore>,
    pub uploads: UploadAssembler,
    pub jobs: JobStore,
    pub artifacts: ArtifactRegistry,
}

impl Store {
    /// Open (and migrate) the store rooted at `config.data_dir`.
    pub async fn open(config: StoreConfig) -> StoreResult<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let pool = db::connect(&config).await?;
        db::migrate(&pool).await?;

        let blobs = Arc::new(BlobStore::new(config.blob_dir(), pool.clone()).await?);
        let uploads =
            UploadAssembler::new(config.clone(), pool.clone(), Arc::clone(&blobs)).await?;
        let jobs = JobStore::new(pool.clone());
        let artifacts = ArtifactRegistry::new(pool);

        Ok(Self {
            blobs,
            uploads,
            jobs,
            artifacts,
        })
    }

    /// Delete a job, cascading to its artifacts and transcript.
    ///
    /// Blob references held by the job (its input, taken at submit) and by
    /// its artifacts are released; blobs still referenced elsewhere survive
    /// at the blob layer.
    pub async fn delete_job(&self, job_id: &JobId, principal_id: &str) -> StoreResult<()> {
        let job = self.jobs.get_owned(job_id, principal_id).await?;
        if job.status == JobStatus::Running {
            return Err(StoreError::conflict("cannot delete a running job"));
        }

        let artifact_blobs = self.artifacts.delete_by_job(job_id).await?;
        for blob in &artifact_blobs {
            self.blobs.release(blob).await?;
        }

        self.jobs.delete(job_id, principal_id).await?;
        self.blobs.release(&job.input_blob_id).await?;
        Ok(())
    }
}
