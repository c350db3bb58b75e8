//! Speech-to-text integration.
//!
//! The pipeline depends on an external ASR tool through the `SpeechToText`
//! trait. The default implementation shells out to a whisper-style CLI that
//! prints a JSON document with segment and word timings on stdout. A missing
//! or empty result is "no speech detected", which is not an error: the job
//! proceeds with an empty transcript.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use clipforge_models::{Transcript, TranscriptSegment, Word};

use crate::error::{MediaError, MediaResult};

/// Default timeout for a transcription run.
const DEFAULT_ASR_TIMEOUT: Duration = Duration::from_secs(600);

/// Asynchronous speech-to-text dependency.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe a mono 16 kHz WAV file into a timed transcript.
    async fn transcribe(&self, audio: &Path) -> MediaResult<Transcript>;
}

/// JSON document the ASR CLI prints on stdout.
#[derive(Debug, Deserialize)]
struct AsrOutput {
    #[serde(default)]
    segments: Vec<AsrSegment>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AsrSegment {
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    words: Vec<AsrWord>,
}

#[derive(Debug, Deserialize)]
struct AsrWord {
    start: f64,
    end: f64,
    word: String,
}

/// Whisper-style CLI transcriber.
pub struct WhisperCli {
    binary: PathBuf,
    model: Option<String>,
    timeout: Duration,
}

impl WhisperCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            model: None,
            timeout: DEFAULT_ASR_TIMEOUT,
        }
    }

    /// Create from environment variables (`ASR_BIN`, `ASR_MODEL`).
    pub fn from_env() -> Self {
        let binary = std::env::var("ASR_BIN").unwrap_or_else(|_| "whisper-cli".to_string());
        let mut cli = Self::new(binary);
        cli.model = std::env::var("ASR_MODEL").ok();
        cli
    }

    /// Set the model argument passed to the CLI.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the run timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl SpeechToText for WhisperCli {
    async fn transcribe(&self, audio: &Path) -> MediaResult<Transcript> {
        let mut cmd = Command::new(&self.binary);
        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }
        cmd.arg("--output-json").arg(audio);

        debug!(binary = %self.binary.display(), audio = %audio.display(), "running ASR");

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| MediaError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| MediaError::asr_failed(format!("failed to run ASR binary: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::asr_failed(format!(
                "ASR exited with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let transcript = parse_asr_output(stdout.trim())?;

        if transcript.is_empty() {
            info!("no speech detected");
        } else {
            info!(
                words = transcript.word_count(),
                segments = transcript.segments.len(),
                "transcription complete"
            );
        }

        Ok(transcript)
    }
}

/// Parse the ASR CLI's JSON output into a transcript.
///
/// An empty stdout means no speech was detected.
pub fn parse_asr_output(stdout: &str) -> MediaResult<Transcript> {
    if stdout.is_empty() {
        return Ok(Transcript::default());
    }

    let parsed: AsrOutput = serde_json::from_str(stdout)?;

    if let Some(error) = parsed.error {
        return Err(MediaError::asr_failed(error));
    }

    let segments = parsed
        .segments
        .into_iter()
        .filter(|s| s.end > s.start)
        .map(|s| {
            let words = s
                .words
                .into_iter()
                .filter(|w| !w.word.trim().is_empty())
                .map(|w| Word {
                    start: w.start,
                    end: w.end.max(w.start),
                    text: w.word.trim().to_string(),
                })
                .collect();
            TranscriptSegment {
                start: s.start,
                end: s.end,
                text: s.text.trim().to_string(),
                words,
            }
        })
        .collect::<Vec<_>>();

    if segments.iter().all(|s| s.words.is_empty()) && !segments.is_empty() {
        warn!("ASR output had segments but no word timings, treating as no speech");
        return Ok(Transcript::default());
    }

    Ok(Transcript { segments })
}
