//! Artifact registry and persisted transcripts.

use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use clipforge_models::{
    ArtifactId, AspectRatio, BlobId, ClipArtifact, JobId, Transcript,
};

use crate::error::{StoreError, StoreResult};

/// Registry of produced clips, part of the job store's tables.
#[derive(Clone)]
pub struct ArtifactRegistry {
    pool: SqlitePool,
}

impl ArtifactRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register all artifacts for a job in one transaction.
    ///
    /// Finalize calls this exactly once per successful job, so the set of
    /// artifact rows becomes visible atomically.
    pub async fn insert_all(&self, artifacts: &[ClipArtifact]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        for artifact in artifacts {
            sqlx::query(
                "INSERT INTO artifacts
                    (id, job_id, ordinal, blob_id, duration, source_start, source_end,
                     aspect_ratio, captions_added, viral_score, caption_track_id)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(artifact.id.as_str())
            .bind(artifact.job_id.as_str())
            .bind(artifact.ordinal as i64)
            .bind(artifact.blob_id.as_str())
            .bind(artifact.duration)
            .bind(artifact.source_start)
            .bind(artifact.source_end)
            .bind(artifact.aspect_ratio.as_str())
            .bind(artifact.captions_added)
            .bind(artifact.viral_score)
            .bind(&artifact.caption_track_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            job_id = %artifacts.first().map(|a| a.job_id.to_string()).unwrap_or_default(),
            count = artifacts.len(),
            "registered artifacts"
        );
        Ok(())
    }

    /// Artifacts for a job, in ordinal order. Ownership of the parent job is
    /// the caller's responsibility (checked via `JobStore::get_owned`).
    pub async fn list_by_job(&self, job_id: &JobId) -> StoreResult<Vec<ClipArtifact>> {
        let rows = sqlx::query("SELECT * FROM artifacts WHERE job_id = ? ORDER BY ordinal ASC")
            .bind(job_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_artifact).collect()
    }

    /// Fetch one artifact, verifying the requesting principal owns its job.
    pub async fn get_owned(
        &self,
        artifact_id: &ArtifactId,
        principal_id: &str,
    ) -> StoreResult<ClipArtifact> {
        let row = sqlx::query(
            "SELECT a.*, j.principal_id AS owner
             FROM artifacts a JOIN jobs j ON j.id = a.job_id
             WHERE a.id = ?",
        )
        .bind(artifact_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("artifact {}", artifact_id)))?;

        let owner: String = row.get("owner");
        if owner != principal_id {
            return Err(StoreError::forbidden("artifact belongs to another principal"));
        }

        row_to_artifact(&row)
    }

    /// Delete a job's artifacts, returning the blob ids they referenced so
    /// the caller can release the blob references.
    pub async fn delete_by_job(&self, job_id: &JobId) -> StoreResult<Vec<BlobId>> {
        let rows = sqlx::query("SELECT blob_id FROM artifacts WHERE job_id = ?")
            .bind(job_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        let blob_ids = rows
            .iter()
            .map(|r| BlobId::from_hex(r.get::<String, _>("blob_id")))
            .collect();

        sqlx::query("DELETE FROM artifacts WHERE job_id = ?")
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(blob_ids)
    }

    /// Persist a job's transcript so downstream consumers can read it
    /// without re-running ASR. Overwrites any prior attempt's transcript.
    pub async fn put_transcript(
        &self,
        job_id: &JobId,
        transcript: &Transcript,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO transcripts (job_id, segments_json, created_at)
             VALUES (?, ?, ?)
             ON CONFLICT(job_id) DO UPDATE SET segments_json = excluded.segments_json,
                                               created_at = excluded.created_at",
        )
        .bind(job_id.as_str())
        .bind(serde_json::to_string(&transcript.segments)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(job_id = %job_id, words = transcript.word_count(), "persisted transcript");
        Ok(())
    }

    /// Read a job's persisted transcript, if any.
    pub async fn transcript(&self, job_id: &JobId) -> StoreResult<Option<Transcript>> {
        let row = sqlx::query("SELECT segments_json FROM transcripts WHERE job_id = ?")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let segments = serde_json::from_str(&row.get::<String, _>("segments_json"))?;
                Ok(Some(Transcript { segments }))
            }
        }
    }
}

fn row_to_artifact(row: &SqliteRow) -> StoreResult<ClipArtifact> {
    let aspect: String = row.get("aspect_ratio");
    Ok(ClipArtifact {
        id: ArtifactId::from_string(row.get::<String, _>("id")),
        job_id: JobId::from_string(row.get::<String, _>("job_id")),
        ordinal: row.get::<i64, _>("ordinal") as u32,
        blob_id: BlobId::from_hex(row.get::<String, _>("blob_id")),
        duration: row.get("duration"),
        source_start: row.get("source_start"),
        source_end: row.get("source_end"),
        aspect_ratio: aspect
            .parse::<AspectRatio>()
            .map_err(|e| StoreError::invalid(e.to_string()))?,
        captions_added: row.get("captions_added"),
        viral_score: row.get("viral_score"),
        caption_track_id: row.get("caption_track_id"),
    })
}
