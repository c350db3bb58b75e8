//! Progress events pushed to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobStatus, Stage};

/// A single progress event on a job's stream.
///
/// `seq` is strictly increasing per job; subscribers that observe a gap
/// after their snapshot know they lagged and must resubscribe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Per-job sequence number, starting at 1
    pub seq: u64,
    /// Job this event belongs to
    pub job_id: JobId,
    /// Job status at emission time
    pub status: JobStatus,
    /// Executing stage name, empty before the first stage
    pub phase: String,
    /// Overall percent, 0..=100
    pub percent: u8,
    /// Human-readable description
    pub description: String,
    /// Emission timestamp
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(
        seq: u64,
        job_id: JobId,
        status: JobStatus,
        phase: Option<Stage>,
        percent: u8,
        description: impl Into<String>,
    ) -> Self {
        Self {
            seq,
            job_id,
            status,
            phase: phase.map(|s| s.as_str().to_string()).unwrap_or_default(),
            percent: percent.min(100),
            description: description.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_wire_shape() {
        let ev = ProgressEvent::new(
            3,
            JobId::from_string("job-1"),
            JobStatus::Running,
            Some(Stage::Transcribe),
            25,
            "Transcribing audio",
        );
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["seq"], 3);
        assert_eq!(json["status"], "running");
        assert_eq!(json["phase"], "transcribe");
        assert_eq!(json["percent"], 25);
    }

    #[test]
    fn percent_is_clamped() {
        let ev = ProgressEvent::new(1, JobId::new(), JobStatus::Running, None, 150, "x");
        assert_eq!(ev.percent, 100);
    }
}
