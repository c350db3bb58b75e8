//! Pipeline stage names and their progress bands.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A stage of the media pipeline.
///
/// Stages execute strictly in declaration order. Each stage owns a fixed
/// sub-range of the overall progress percentage, so a job's percent is
/// comparable across attempts and restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Probe,
    ExtractAudio,
    Transcribe,
    Score,
    Cut,
    Reframe,
    CaptionBurn,
    Finalize,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: &'static [Stage] = &[
        Stage::Probe,
        Stage::ExtractAudio,
        Stage::Transcribe,
        Stage::Score,
        Stage::Cut,
        Stage::Reframe,
        Stage::CaptionBurn,
        Stage::Finalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Probe => "probe",
            Stage::ExtractAudio => "extract",
            Stage::Transcribe => "transcribe",
            Stage::Score => "score",
            Stage::Cut => "cut",
            Stage::Reframe => "reframe",
            Stage::CaptionBurn => "caption",
            Stage::Finalize => "finalize",
        }
    }

    /// The [start, end] percent band this stage advances through.
    pub fn percent_band(&self) -> (u8, u8) {
        match self {
            Stage::Probe => (0, 5),
            Stage::ExtractAudio => (5, 10),
            Stage::Transcribe => (10, 40),
            Stage::Score => (40, 45),
            Stage::Cut => (45, 60),
            Stage::Reframe => (60, 75),
            Stage::CaptionBurn => (75, 90),
            Stage::Finalize => (90, 100),
        }
    }

    /// Map a completion fraction within this stage to an overall percent.
    pub fn percent_at(&self, fraction: f64) -> u8 {
        let (lo, hi) = self.percent_band();
        let f = fraction.clamp(0.0, 1.0);
        (lo as f64 + f * (hi - lo) as f64).round() as u8
    }

    /// Wall-clock deadline for this stage in seconds.
    pub fn deadline_secs(&self) -> u64 {
        match self {
            Stage::Probe => 30,
            Stage::ExtractAudio => 120,
            Stage::Transcribe => 600,
            Stage::Score => 30,
            Stage::Cut => 180,
            Stage::Reframe => 300,
            Stage::CaptionBurn => 300,
            Stage::Finalize => 120,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_are_contiguous_and_cover_0_to_100() {
        let mut expected_start = 0;
        for stage in Stage::ALL {
            let (lo, hi) = stage.percent_band();
            assert_eq!(lo, expected_start, "band gap before {}", stage);
            assert!(hi > lo);
            expected_start = hi;
        }
        assert_eq!(expected_start, 100);
    }

    #[test]
    fn percent_at_clamps_fraction() {
        assert_eq!(Stage::Transcribe.percent_at(0.0), 10);
        assert_eq!(Stage::Transcribe.percent_at(0.5), 25);
        assert_eq!(Stage::Transcribe.percent_at(1.0), 40);
        assert_eq!(Stage::Transcribe.percent_at(7.0), 40);
        assert_eq!(Stage::Finalize.percent_at(1.0), 100);
    }
}
