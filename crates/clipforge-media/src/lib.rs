//! Media pipeline stage implementations.
//!
//! Each stage is a thin, testable function over FFmpeg/FFprobe process
//! invocations or pure logic (scoring, caption rendering, reframe planning).
//! The worker in `clipforge-scheduler` sequences stages, maps their progress
//! into the job's percent bands and classifies their failures.

pub mod asr;
pub mod audio;
pub mod captions;
pub mod command;
pub mod cut;
pub mod encode;
pub mod error;
pub mod probe;
pub mod reframe;
pub mod score;

pub use asr::{SpeechToText, WhisperCli};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_media, MediaInfo};
pub use score::ClipCandidate;
