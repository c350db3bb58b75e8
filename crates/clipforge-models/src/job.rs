//! Job lifecycle types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ArtifactId, BlobId, JobError, JobId, JobOptions, Stage};

/// Job lifecycle state.
///
/// Transitions are monotone along the DAG:
/// `Pending -> Running -> {Completed, Failed, Cancelled}`, with `Cancelled`
/// also reachable directly from `Pending` and `Running -> Pending` allowed
/// for retryable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in queue
    #[default]
    Pending,
    /// A worker owns the job
    Running,
    /// Terminal: all artifacts registered
    Completed,
    /// Terminal: classified error recorded
    Failed,
    /// Terminal: cancelled by the user
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `to` is a legal transition.
    pub fn can_transition(&self, to: JobStatus) -> bool {
        matches!(
            (self, to),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
                // retryable failure re-enqueues
                | (JobStatus::Running, JobStatus::Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(JobStatusParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown job status: {0}")]
pub struct JobStatusParseError(String);

/// Type of job. Only video clipping exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    #[default]
    Videoclip,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Videoclip => "videoclip",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobType {
    type Err = JobTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "videoclip" => Ok(JobType::Videoclip),
            _ => Err(JobTypeParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown job type: {0}")]
pub struct JobTypeParseError(String);

/// Point-in-time progress of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Progress {
    /// Currently executing stage, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Stage>,
    /// Overall percent, 0..=100, non-decreasing within an attempt
    pub percent: u8,
    /// Human-readable description of the current step
    pub description: String,
}

impl Progress {
    pub fn at(phase: Stage, percent: u8, description: impl Into<String>) -> Self {
        Self {
            phase: Some(phase),
            percent: percent.min(100),
            description: description.into(),
        }
    }
}

/// Structured results of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResults {
    /// Number of clips produced
    pub total_clips: u32,
    /// Duration of the source media in seconds
    pub source_duration: f64,
    /// Produced artifacts, in ordinal order
    pub artifact_ids: Vec<ArtifactId>,
}

/// A unit of pipeline work with a durable lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Owning principal
    pub principal_id: String,

    /// Job type
    pub job_type: JobType,

    /// Input blob to process
    pub input_blob_id: BlobId,

    /// Processing options
    pub options: JobOptions,

    /// Lifecycle state
    pub status: JobStatus,

    /// Current progress snapshot
    pub progress: Progress,

    /// Classified error; present iff status is Failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,

    /// Structured results; present iff status is Completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<JobResults>,

    /// Number of processing attempts started
    pub attempts: u32,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,

    /// First dispatch timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Terminal transition timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(
        principal_id: impl Into<String>,
        input_blob_id: BlobId,
        options: JobOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            principal_id: principal_id.into(),
            job_type: JobType::Videoclip,
            input_blob_id,
            options,
            status: JobStatus::Pending,
            progress: Progress::default(),
            error: None,
            results: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn status_dag() {
        use JobStatus::*;

        assert!(Pending.can_transition(Running));
        assert!(Pending.can_transition(Cancelled));
        assert!(Running.can_transition(Completed));
        assert!(Running.can_transition(Failed));
        assert!(Running.can_transition(Cancelled));
        assert!(Running.can_transition(Pending));

        assert!(!Pending.can_transition(Completed));
        assert!(!Pending.can_transition(Failed));
        assert!(!Completed.can_transition(Running));
        assert!(!Failed.can_transition(Pending));
        assert!(!Cancelled.can_transition(Running));
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn new_job_is_pending() {
        let job = Job::new("user-1", BlobId::from_hex("ab".repeat(32)), JobOptions::default());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.error.is_none());
        assert!(job.results.is_none());
    }

    #[test]
    fn job_serde_omits_absent_error_and_results() {
        let job = Job::new("user-1", BlobId::from_hex("ab".repeat(32)), JobOptions::default());
        let json = serde_json::to_string(&job).unwrap();
        assert!(!json.contains("\"error\""));
        assert!(!json.contains("\"results\""));

        let mut failed = job;
        failed.status = JobStatus::Failed;
        failed.error = Some(JobError::new(ErrorKind::Unreadable, "no video stream"));
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains("\"unreadable\""));
    }
}
