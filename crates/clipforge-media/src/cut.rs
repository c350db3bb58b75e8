//! Sub-clip extraction.

use std::path::Path;

use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Extract a sub-clip from the source without re-encoding.
///
/// `-ss` before `-i` seeks to the previous keyframe, so the cut is lossless
/// within the GOP; exact frame accuracy is restored by the re-encode in the
/// finalize stage.
pub async fn cut_clip(
    source: &Path,
    output: &Path,
    start: f64,
    duration: f64,
    runner: &FfmpegRunner,
) -> MediaResult<()> {
    debug!(
        source = %source.display(),
        start,
        duration,
        "cutting sub-clip"
    );

    let cmd = FfmpegCommand::new(source, output)
        .seek(start)
        .duration(duration)
        .stream_copy()
        // Negative timestamps confuse some players after a stream copy cut
        .output_arg("-avoid_negative_ts")
        .output_arg("make_zero");

    runner.run(&cmd).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cut_command_shape() {
        let cmd = FfmpegCommand::new("src.mp4", "clip.mp4")
            .seek(30.5)
            .duration(15.0)
            .stream_copy()
            .output_arg("-avoid_negative_ts")
            .output_arg("make_zero");
        let args = cmd.build_args();

        assert!(args.contains(&"-ss".to_string()));
        assert!(args.contains(&"30.500".to_string()));
        assert!(args.contains(&"-t".to_string()));
        assert!(args.contains(&"copy".to_string()));
        assert!(args.contains(&"-avoid_negative_ts".to_string()));
    }
}
