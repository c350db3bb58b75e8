//! Durable job rows: lifecycle transitions, progress, leases.
//!
//! A job row is modified only by its current worker (while Running) or the
//! scheduler (transitions into/out of Running and terminal states). All
//! transition writes are guarded by the current status and, where a worker
//! owns the row, by its lease token, so a lost worker cannot clobber a
//! newer state.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use clipforge_models::{
    BlobId, Job, JobError, JobId, JobOptions, JobResults, JobStatus, JobType, Progress,
    QueueClass, Stage,
};

use crate::error::{StoreError, StoreResult};

/// Filters for listing a principal's jobs.
#[derive(Debug, Clone, Default)]
pub struct JobListFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

/// Job persistence handle.
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a freshly created pending job under its priority class.
    pub async fn insert(&self, job: &Job, queue_class: QueueClass) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO jobs
                (id, principal_id, job_type, input_blob_id, options_json, status,
                 phase, percent, description, attempts, queue_class, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, NULL, 0, '', 0, ?, ?, ?)",
        )
        .bind(job.id.as_str())
        .bind(&job.principal_id)
        .bind(job.job_type.as_str())
        .bind(job.input_blob_id.as_str())
        .bind(serde_json::to_string(&job.options)?)
        .bind(job.status.as_str())
        .bind(queue_class.as_str())
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %job.id, principal = %job.principal_id, "inserted job");
        Ok(())
    }

    /// Fetch a job by id.
    pub async fn get(&self, job_id: &JobId) -> StoreResult<Job> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("job {}", job_id)))?;
        row_to_job(&row)
    }

    /// Fetch a job, verifying the requesting principal owns it.
    pub async fn get_owned(&self, job_id: &JobId, principal_id: &str) -> StoreResult<Job> {
        let job = self.get(job_id).await?;
        if job.principal_id != principal_id {
            return Err(StoreError::forbidden("job belongs to another principal"));
        }
        Ok(job)
    }

    /// List a principal's jobs, newest first.
    pub async fn list(&self, principal_id: &str, filter: &JobListFilter) -> StoreResult<Vec<Job>> {
        let mut sql = String::from("SELECT * FROM jobs WHERE principal_id = ?");
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.job_type.is_some() {
            sql.push_str(" AND job_type = ?");
        }
        if filter.created_after.is_some() {
            sql.push_str(" AND created_at >= ?");
        }
        if filter.created_before.is_some() {
            sql.push_str(" AND created_at <= ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql).bind(principal_id);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(job_type) = filter.job_type {
            query = query.bind(job_type.as_str());
        }
        if let Some(after) = filter.created_after {
            query = query.bind(after);
        }
        if let Some(before) = filter.created_before {
            query = query.bind(before);
        }
        let limit = if filter.limit == 0 { 50 } else { filter.limit.min(500) };
        query = query.bind(limit as i64).bind(filter.offset as i64);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_job).collect()
    }

    /// All pending jobs with their priority class, in submission order
    /// (startup queue rebuild).
    pub async fn pending(&self) -> StoreResult<Vec<(Job, QueueClass)>> {
        let rows =
            sqlx::query("SELECT * FROM jobs WHERE status = 'pending' ORDER BY created_at ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|row| {
                let class: String = row.get("queue_class");
                let class = if class == "interactive" {
                    QueueClass::Interactive
                } else {
                    QueueClass::Batch
                };
                Ok((row_to_job(row)?, class))
            })
            .collect()
    }

    /// Running jobs whose lease is missing or expired (crash recovery).
    pub async fn running_with_lost_lease(&self) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs
             WHERE status = 'running'
               AND (worker_lease IS NULL OR lease_expires_at IS NULL OR lease_expires_at < ?)",
        )
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job).collect()
    }

    /// Dispatch: Pending -> Running, incrementing the attempt counter and
    /// resetting progress for the new attempt.
    pub async fn mark_running(
        &self,
        job_id: &JobId,
        lease: &str,
        lease_ttl: std::time::Duration,
    ) -> StoreResult<Job> {
        let now = Utc::now();
        let lease_expires = now
            + ChronoDuration::from_std(lease_ttl).unwrap_or_else(|_| ChronoDuration::seconds(60));

        let updated = sqlx::query(
            "UPDATE jobs
             SET status = 'running',
                 attempts = attempts + 1,
                 phase = NULL,
                 percent = 0,
                 description = 'Starting',
                 error_json = NULL,
                 worker_lease = ?,
                 lease_expires_at = ?,
                 started_at = COALESCE(started_at, ?),
                 updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(lease)
        .bind(lease_expires)
        .bind(now)
        .bind(now)
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            let current = self.get(job_id).await?;
            return Err(StoreError::InvalidTransition {
                from: current.status.as_str().to_string(),
                to: JobStatus::Running.as_str().to_string(),
            });
        }

        self.get(job_id).await
    }

    /// Refresh a worker's lease. Returns false if the lease no longer matches.
    pub async fn heartbeat(
        &self,
        job_id: &JobId,
        lease: &str,
        lease_ttl: std::time::Duration,
    ) -> StoreResult<bool> {
        let now = Utc::now();
        let lease_expires = now
            + ChronoDuration::from_std(lease_ttl).unwrap_or_else(|_| ChronoDuration::seconds(60));

        let updated = sqlx::query(
            "UPDATE jobs SET lease_expires_at = ?, updated_at = ?
             WHERE id = ? AND worker_lease = ? AND status = 'running'",
        )
        .bind(lease_expires)
        .bind(now)
        .bind(job_id.as_str())
        .bind(lease)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated > 0)
    }

    /// Update the progress snapshot. Percent is clamped to be non-decreasing
    /// within the current attempt.
    pub async fn update_progress(
        &self,
        job_id: &JobId,
        phase: Stage,
        percent: u8,
        description: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE jobs
             SET phase = ?, percent = MAX(percent, ?), description = ?, updated_at = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(phase.as_str())
        .bind(percent.min(100) as i64)
        .bind(description)
        .bind(Utc::now())
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Running -> Completed with structured results. Guarded by the lease so
    /// a cancelled or reclaimed job cannot be completed by a stale worker.
    pub async fn complete(
        &self,
        job_id: &JobId,
        lease: &str,
        results: &JobResults,
    ) -> StoreResult<Job> {
        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE jobs
             SET status = 'completed', percent = 100, description = ?,
                 results_json = ?, worker_lease = NULL, lease_expires_at = NULL,
                 finished_at = ?, updated_at = ?
             WHERE id = ? AND status = 'running' AND worker_lease = ?",
        )
        .bind(format!("Generated {} clip(s)", results.total_clips))
        .bind(serde_json::to_string(results)?)
        .bind(now)
        .bind(now)
        .bind(job_id.as_str())
        .bind(lease)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::conflict("job is no longer owned by this worker"));
        }

        info!(job_id = %job_id, clips = results.total_clips, "job completed");
        self.get(job_id).await
    }

    /// Running -> Failed with a classified error.
    pub async fn fail(&self, job_id: &JobId, lease: &str, error: &JobError) -> StoreResult<Job> {
        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE jobs
             SET status = 'failed', description = ?, error_json = ?,
                 worker_lease = NULL, lease_expires_at = NULL,
                 finished_at = ?, updated_at = ?
             WHERE id = ? AND status = 'running' AND worker_lease = ?",
        )
        .bind(&error.message)
        .bind(serde_json::to_string(error)?)
        .bind(now)
        .bind(now)
        .bind(job_id.as_str())
        .bind(lease)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::conflict("job is no longer owned by this worker"));
        }

        info!(job_id = %job_id, kind = %error.kind, "job failed");
        self.get(job_id).await
    }

    /// Running -> Pending for a retryable failure. The error is not persisted
    /// (error rows exist only on Failed jobs); the description records why
    /// the job went back to the queue.
    pub async fn requeue(&self, job_id: &JobId, lease: &str, reason: &str) -> StoreResult<Job> {
        let updated = sqlx::query(
            "UPDATE jobs
             SET status = 'pending', phase = NULL, description = ?,
                 worker_lease = NULL, lease_expires_at = NULL, updated_at = ?
             WHERE id = ? AND status = 'running' AND worker_lease = ?",
        )
        .bind(format!("Retrying: {}", reason))
        .bind(Utc::now())
        .bind(job_id.as_str())
        .bind(lease)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::conflict("job is no longer owned by this worker"));
        }

        self.get(job_id).await
    }

    /// Pending -> Cancelled. Returns false when the job was not pending.
    pub async fn cancel_pending(&self, job_id: &JobId) -> StoreResult<bool> {
        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE jobs
             SET status = 'cancelled', description = 'Cancelled',
                 finished_at = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(now)
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    /// Running -> Cancelled, written by the worker at a checkpoint.
    pub async fn cancel_running(&self, job_id: &JobId, lease: &str) -> StoreResult<bool> {
        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE jobs
             SET status = 'cancelled', description = 'Cancelled',
                 worker_lease = NULL, lease_expires_at = NULL,
                 finished_at = ?, updated_at = ?
             WHERE id = ? AND status = 'running' AND worker_lease = ?",
        )
        .bind(now)
        .bind(now)
        .bind(job_id.as_str())
        .bind(lease)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    /// Recovery: Running (lost lease) -> Pending.
    pub async fn recover_to_pending(&self, job_id: &JobId) -> StoreResult<bool> {
        let updated = sqlx::query(
            "UPDATE jobs
             SET status = 'pending', phase = NULL,
                 description = 'Recovered after worker loss',
                 worker_lease = NULL, lease_expires_at = NULL, updated_at = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(Utc::now())
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    /// Recovery: Running (lost lease, retries exhausted) -> Failed.
    pub async fn fail_lost(&self, job_id: &JobId, error: &JobError) -> StoreResult<bool> {
        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE jobs
             SET status = 'failed', description = ?, error_json = ?,
                 worker_lease = NULL, lease_expires_at = NULL,
                 finished_at = ?, updated_at = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(&error.message)
        .bind(serde_json::to_string(error)?)
        .bind(now)
        .bind(now)
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    /// Delete a job row. Artifact cascade is handled by the registry.
    pub async fn delete(&self, job_id: &JobId, principal_id: &str) -> StoreResult<()> {
        self.get_owned(job_id, principal_id).await?;
        sqlx::query("DELETE FROM transcripts WHERE job_id = ?")
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Count of non-terminal jobs for a principal (admission checks).
    pub async fn active_count(&self, principal_id: &str) -> StoreResult<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs
             WHERE principal_id = ? AND status IN ('pending', 'running')",
        )
        .bind(principal_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u32)
    }
}

fn row_to_job(row: &SqliteRow) -> StoreResult<Job> {
    let status: String = row.get("status");
    let job_type: String = row.get("job_type");
    let phase: Option<String> = row.get("phase");
    let options_json: String = row.get("options_json");
    let error_json: Option<String> = row.get("error_json");
    let results_json: Option<String> = row.get("results_json");

    let phase = phase.and_then(|p| {
        Stage::ALL
            .iter()
            .copied()
            .find(|s| s.as_str() == p)
    });

    Ok(Job {
        id: JobId::from_string(row.get::<String, _>("id")),
        principal_id: row.get("principal_id"),
        job_type: job_type
            .parse::<JobType>()
            .map_err(|e| StoreError::invalid(e.to_string()))?,
        input_blob_id: BlobId::from_hex(row.get::<String, _>("input_blob_id")),
        options: serde_json::from_str::<JobOptions>(&options_json)?,
        status: status
            .parse::<JobStatus>()
            .map_err(|e| StoreError::invalid(e.to_string()))?,
        progress: Progress {
            phase,
            percent: row.get::<i64, _>("percent") as u8,
            description: row.get("description"),
        },
        error: error_json.map(|s| serde_json::from_str(&s)).transpose()?,
        results: results_json.map(|s| serde_json::from_str(&s)).transpose()?,
        attempts: row.get::<i64, _>("attempts") as u32,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
    })
}
