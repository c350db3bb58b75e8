//! Heuristic scoring of candidate clip windows.
//!
//! Scores are derived from the transcript alone: speech density relative to
//! the whole recording, marker words that correlate with shareable moments,
//! and alignment with sentence boundaries. Output is an ordered list of
//! windows with scores in [0, 10], deduplicated by overlap.

use tracing::debug;

use clipforge_models::Transcript;

/// Overlap threshold above which two candidates are considered duplicates.
pub const DEDUP_IOU_THRESHOLD: f64 = 0.3;

/// Default number of clips selected per job.
pub const DEFAULT_CLIP_COUNT: usize = 3;

/// Marker words that correlate with high-engagement moments.
const EMPHASIS_MARKERS: &[&str] = &[
    "secret", "crazy", "insane", "amazing", "unbelievable", "never", "always",
    "best", "worst", "free", "money", "hack", "trick", "wow", "huge", "mistake",
];

const LAUGHTER_MARKERS: &[&str] = &["haha", "lol", "laugh", "funny", "hilarious"];

/// A candidate clip window.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipCandidate {
    /// Window start within the source, seconds
    pub start: f64,
    /// Window end within the source, seconds
    pub end: f64,
    /// Heuristic score in [0, 10]
    pub score: f64,
}

impl ClipCandidate {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Choose the clip length: a valid hint wins, otherwise the duration ladder.
pub fn pick_clip_length(hint: Option<f64>, total_duration: f64) -> f64 {
    if let Some(hint) = hint {
        return hint.min(total_duration);
    }
    let ladder: f64 = if total_duration <= 60.0 {
        15.0
    } else if total_duration <= 180.0 {
        30.0
    } else {
        60.0
    };
    ladder.min(total_duration)
}

/// Intersection-over-union of two windows.
pub fn iou(a: &ClipCandidate, b: &ClipCandidate) -> f64 {
    let intersection = (a.end.min(b.end) - a.start.max(b.start)).max(0.0);
    let union = (a.end.max(b.end) - a.start.min(b.start)).max(f64::EPSILON);
    intersection / union
}

/// Drop candidates overlapping a higher-scoring one by more than the
/// threshold. Input order is unconstrained; output is sorted by score
/// descending.
pub fn dedup_candidates(mut candidates: Vec<ClipCandidate>) -> Vec<ClipCandidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<ClipCandidate> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= DEDUP_IOU_THRESHOLD) {
            kept.push(candidate);
        }
    }
    kept
}

/// Score candidate windows over a transcript and select the top `k`.
///
/// Candidates are anchored at segment starts so clips open on sentence
/// boundaries. With an empty transcript the caller should fall back to
/// `fallback_windows`.
pub fn select_candidates(
    transcript: &Transcript,
    total_duration: f64,
    clip_len: f64,
    k: usize,
) -> Vec<ClipCandidate> {
    if transcript.is_empty() {
        return fallback_windows(total_duration, clip_len, k);
    }

    let total_words = transcript.word_count() as f64;
    let speech_span = transcript.speech_end().max(1.0);
    let avg_wps = total_words / speech_span;

    let mut candidates = Vec::new();
    for segment in &transcript.segments {
        let start = segment.start.min((total_duration - clip_len).max(0.0));
        let end = (start + clip_len).min(total_duration);
        if end - start < 1.0 {
            continue;
        }

        let words = transcript.words_between(start, end);
        if words.is_empty() {
            continue;
        }

        let wps = words.len() as f64 / (end - start);
        let energy = (wps / avg_wps.max(f64::EPSILON)).min(2.0);

        let mut marker_hits = 0u32;
        let mut has_question = false;
        for word in &words {
            let lower = word.text.to_lowercase();
            let trimmed = lower.trim_matches(|c: char| !c.is_alphanumeric()).to_string();
            if EMPHASIS_MARKERS.contains(&trimmed.as_str())
                || LAUGHTER_MARKERS.contains(&trimmed.as_str())
            {
                marker_hits += 1;
            }
            if lower.ends_with('?') || lower.ends_with('!') {
                has_question = true;
            }
        }

        // Windows anchored at a segment start open on a sentence boundary.
        let boundary_bonus = 1.0;

        let score = (2.0
            + energy * 2.0
            + (marker_hits as f64 * 1.5).min(3.0)
            + boundary_bonus
            + if has_question { 0.5 } else { 0.0 })
        .clamp(0.0, 10.0);

        candidates.push(ClipCandidate { start, end, score });
    }

    let deduped = dedup_candidates(candidates);
    let selected: Vec<ClipCandidate> = deduped.into_iter().take(k).collect();
    debug!(selected = selected.len(), "selected clip candidates");
    selected
}

/// Evenly spaced windows for media with no usable transcript.
///
/// Windows get a neutral score so ordering is positional.
pub fn fallback_windows(total_duration: f64, clip_len: f64, k: usize) -> Vec<ClipCandidate> {
    let clip_len = clip_len.min(total_duration);
    if clip_len <= 0.0 || k == 0 {
        return Vec::new();
    }

    // No room for more than one distinct window in very short media.
    let count = if total_duration <= clip_len * 1.5 { 1 } else { k };

    let mut windows = Vec::with_capacity(count);
    for i in 0..count {
        let center = total_duration / (count as f64 + 1.0) * (i as f64 + 1.0);
        let start = (center - clip_len / 2.0).clamp(0.0, (total_duration - clip_len).max(0.0));
        windows.push(ClipCandidate {
            start,
            end: start + clip_len,
            score: 5.0,
        });
    }

    dedup_candidates(windows)
        .into_iter()
        .take(k)
        .collect()
}
