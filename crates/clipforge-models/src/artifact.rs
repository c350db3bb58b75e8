//! Clip artifact descriptor.

use serde::{Deserialize, Serialize};

use crate::{ArtifactId, AspectRatio, BlobId, JobId};

/// A final output clip belonging to a job.
///
/// Ordinals are dense within a job: a job with N artifacts has exactly
/// the ordinals 1..=N.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipArtifact {
    /// Unique artifact ID
    pub id: ArtifactId,
    /// Owning job
    pub job_id: JobId,
    /// Position within the job, 1-based
    pub ordinal: u32,
    /// Blob holding the final encoded file
    pub blob_id: BlobId,
    /// Clip duration in seconds
    pub duration: f64,
    /// Start of the clip within the source, seconds
    pub source_start: f64,
    /// End of the clip within the source, seconds
    pub source_end: f64,
    /// Aspect ratio of the output
    pub aspect_ratio: AspectRatio,
    /// Whether captions were burned in
    pub captions_added: bool,
    /// Heuristic virality score, 0..=10
    pub viral_score: f64,
    /// Identifier of the caption track used, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption_track_id: Option<String>,
}

impl ClipArtifact {
    /// Suggested download filename, folding in advisory platform tags.
    pub fn file_name(&self, platforms: &std::collections::BTreeSet<String>) -> String {
        let tag = platforms
            .iter()
            .next()
            .map(|p| format!("_{}", p))
            .unwrap_or_default();
        format!(
            "clip_{:02}_{}{}.mp4",
            self.ordinal,
            self.aspect_ratio.as_str().replace(':', "x"),
            tag
        )
    }
}
