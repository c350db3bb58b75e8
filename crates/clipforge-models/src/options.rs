//! Job options: aspect ratio, quality presets, caption styles.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Target aspect ratio for produced clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AspectRatio {
    /// 9:16 portrait for TikTok/Reels/Shorts
    #[default]
    #[serde(rename = "9:16")]
    Portrait,
    /// 1:1 square
    #[serde(rename = "1:1")]
    Square,
    /// 16:9 landscape
    #[serde(rename = "16:9")]
    Landscape,
}

impl AspectRatio {
    pub const ALL: &'static [AspectRatio] =
        &[AspectRatio::Portrait, AspectRatio::Square, AspectRatio::Landscape];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Portrait => "9:16",
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape => "16:9",
        }
    }

    /// Output canvas dimensions for this aspect.
    pub fn canvas(&self) -> (u32, u32) {
        match self {
            AspectRatio::Portrait => (1080, 1920),
            AspectRatio::Square => (1080, 1080),
            AspectRatio::Landscape => (1920, 1080),
        }
    }

    /// Width over height as a decimal.
    pub fn as_f64(&self) -> f64 {
        let (w, h) = self.canvas();
        w as f64 / h as f64
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = AspectRatioParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "9:16" => Ok(AspectRatio::Portrait),
            "1:1" => Ok(AspectRatio::Square),
            "16:9" => Ok(AspectRatio::Landscape),
            _ => Err(AspectRatioParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown aspect ratio: {0}, expected one of 9:16, 1:1, 16:9")]
pub struct AspectRatioParseError(String);

/// Encoder quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    /// Speed-optimized, low bitrate
    Fast,
    /// Balanced
    #[default]
    Medium,
    /// Quality-biased, slow encode
    High,
}

impl QualityPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityPreset::Fast => "fast",
            QualityPreset::Medium => "medium",
            QualityPreset::High => "high",
        }
    }

    /// x264 speed preset and CRF for this quality level.
    pub fn encoder_tuple(&self) -> (&'static str, u8) {
        match self {
            QualityPreset::Fast => ("veryfast", 28),
            QualityPreset::Medium => ("medium", 23),
            QualityPreset::High => ("slow", 18),
        }
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Burned-in caption style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptionStyle {
    /// Bold uppercase with highlight color on the active word
    #[default]
    Modern,
    /// Boxed broadcast-style line
    Classic,
    /// Thin outline, no box
    Minimal,
}

impl CaptionStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptionStyle::Modern => "modern",
            CaptionStyle::Classic => "classic",
            CaptionStyle::Minimal => "minimal",
        }
    }
}

impl fmt::Display for CaptionStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Valid range for `clip_duration_hint` in seconds; values outside are ignored.
pub const CLIP_HINT_MIN_SECS: f64 = 5.0;
pub const CLIP_HINT_MAX_SECS: f64 = 120.0;

/// User-supplied processing options for a clip job.
///
/// Unknown keys in the request body are ignored, not rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Burn word-synchronized captions into the clips
    #[serde(default)]
    pub add_captions: bool,

    /// Target aspect ratio
    #[serde(default)]
    pub aspect_ratio: AspectRatio,

    /// Advisory platform tags; affect artifact naming only
    #[serde(default)]
    pub target_platforms: BTreeSet<String>,

    /// Target clip length in seconds; ignored outside [5, 120]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_duration_hint: Option<f64>,

    /// Encoder quality preset
    #[serde(default)]
    pub quality_preset: QualityPreset,

    /// Caption typography
    #[serde(default)]
    pub caption_style: CaptionStyle,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            add_captions: false,
            aspect_ratio: AspectRatio::default(),
            target_platforms: BTreeSet::new(),
            clip_duration_hint: None,
            quality_preset: QualityPreset::default(),
            caption_style: CaptionStyle::default(),
        }
    }
}

impl JobOptions {
    /// The duration hint, if present and within the accepted range.
    pub fn effective_duration_hint(&self) -> Option<f64> {
        self.clip_duration_hint
            .filter(|d| (CLIP_HINT_MIN_SECS..=CLIP_HINT_MAX_SECS).contains(d))
    }

    /// Set captions on.
    pub fn with_captions(mut self, style: CaptionStyle) -> Self {
        self.add_captions = true;
        self.caption_style = style;
        self
    }

    /// Set the target aspect ratio.
    pub fn with_aspect(mut self, aspect: AspectRatio) -> Self {
        self.aspect_ratio = aspect;
        self
    }
}
