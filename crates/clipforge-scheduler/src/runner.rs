//! The seam between scheduling and media work.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use clipforge_events::EventBus;
use clipforge_models::{Job, JobError, JobResults, JobStatus, Stage};
use clipforge_store::Store;

/// Everything a runner needs to process one job attempt.
pub struct JobContext {
    /// Snapshot of the job at dispatch time (status Running)
    pub job: Job,
    /// 1-based attempt number of this run
    pub attempt: u32,
    /// Lease token proving ownership of the job row
    pub lease: String,
    /// Persistence handles
    pub store: Store,
    /// Event fan-out
    pub events: Arc<EventBus>,
    /// Cancellation flag, observed at checkpoints
    pub cancel_rx: watch::Receiver<bool>,
    /// Root work directory for intermediates
    pub work_dir: PathBuf,
    /// Clips to select per job
    pub clip_count: usize,
    /// Highest percent reported so far in this attempt
    last_percent: AtomicU8,
}

impl JobContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job: Job,
        attempt: u32,
        lease: String,
        store: Store,
        events: Arc<EventBus>,
        cancel_rx: watch::Receiver<bool>,
        work_dir: PathBuf,
        clip_count: usize,
    ) -> Self {
        Self {
            job,
            attempt,
            lease,
            store,
            events,
            cancel_rx,
            work_dir,
            clip_count,
            last_percent: AtomicU8::new(0),
        }
    }

    /// Directory for this attempt's intermediate files. Keyed by attempt so
    /// a retry never trips over a previous attempt's output.
    pub fn attempt_dir(&self) -> PathBuf {
        self.work_dir
            .join(self.job.id.as_str())
            .join(format!("attempt-{}", self.attempt))
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Cancellation checkpoint: errors with `cancelled` when the flag is set.
    pub fn checkpoint(&self) -> Result<(), JobError> {
        if self.is_cancelled() {
            Err(JobError::cancelled())
        } else {
            Ok(())
        }
    }

    /// Report stage progress: maps the in-stage fraction into the stage's
    /// percent band, clamps to non-decreasing, persists the snapshot and
    /// publishes an event.
    pub async fn report(&self, stage: Stage, fraction: f64, description: impl Into<String>) {
        let description = description.into();
        let target = stage.percent_at(fraction);
        let percent = self.last_percent.fetch_max(target, Ordering::SeqCst).max(target);

        // Persisting failures must not break the pipeline; the store clamps
        // percent independently.
        let _ = self
            .store
            .jobs
            .update_progress(&self.job.id, stage, percent, &description)
            .await;

        self.events.publish(
            &self.job.id,
            JobStatus::Running,
            Some(stage),
            percent,
            description,
        );
    }
}

/// A runner processes one job attempt end to end.
///
/// Returning `Err` with a retryable kind re-enqueues the job (subject to the
/// attempt limit); a `cancelled` kind writes CANCELLED; any other kind writes
/// FAILED. Runners are responsible for removing their own intermediates on
/// failure and cancellation.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, ctx: &JobContext) -> Result<JobResults, JobError>;
}
