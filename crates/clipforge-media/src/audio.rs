//! Audio extraction for ASR.

use std::path::Path;

use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Sample rate expected by the speech-to-text dependency.
pub const ASR_SAMPLE_RATE: u32 = 16_000;

/// Extract a mono 16 kHz PCM WAV suitable for ASR.
pub async fn extract_audio(
    input: &Path,
    output: &Path,
    runner: &FfmpegRunner,
) -> MediaResult<()> {
    debug!(input = %input.display(), output = %output.display(), "extracting audio for ASR");

    let cmd = FfmpegCommand::new(input, output)
        .no_video()
        .audio_channels(1)
        .audio_sample_rate(ASR_SAMPLE_RATE)
        .audio_codec("pcm_s16le");

    runner.run(&cmd).await
}
