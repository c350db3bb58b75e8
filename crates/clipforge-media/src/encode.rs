//! Final encode settings per quality preset.

use clipforge_models::QualityPreset;

/// Default audio codec for final clips.
pub const AUDIO_CODEC: &str = "aac";
/// Default audio bitrate for final clips.
pub const AUDIO_BITRATE: &str = "128k";

/// Encoder configuration derived from a quality preset.
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    /// Video codec
    pub codec: String,
    /// x264 speed preset
    pub preset: String,
    /// Constant Rate Factor (lower is better quality)
    pub crf: u8,
    /// Audio codec
    pub audio_codec: String,
    /// Audio bitrate
    pub audio_bitrate: String,
}

impl EncodeSettings {
    /// Settings for a quality preset.
    pub fn for_preset(preset: QualityPreset) -> Self {
        let (speed, crf) = preset.encoder_tuple();
        Self {
            codec: "libx264".to_string(),
            preset: speed.to_string(),
            crf,
            audio_codec: AUDIO_CODEC.to_string(),
            audio_bitrate: AUDIO_BITRATE.to_string(),
        }
    }

    /// Convert to FFmpeg output arguments.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            self.codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
            "-movflags".to_string(),
            "+faststart".to_string(),
        ]
    }
}
