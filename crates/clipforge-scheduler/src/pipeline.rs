//! The media job runner: sequences the pipeline stages for one attempt.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use clipforge_media::asr::SpeechToText;
use clipforge_media::captions;
use clipforge_media::cut::cut_clip;
use clipforge_media::encode::EncodeSettings;
use clipforge_media::reframe;
use clipforge_media::score::{self, ClipCandidate};
use clipforge_media::{audio, probe_media, FfmpegCommand, FfmpegRunner, MediaError, WhisperCli};
use clipforge_models::{
    ArtifactId, ClipArtifact, JobError, JobResults, Stage, Transcript,
};

use crate::runner::{JobContext, JobRunner};

/// Production job runner: probe → extract → transcribe → score → cut →
/// reframe → caption → finalize.
pub struct MediaRunner {
    asr: Arc<dyn SpeechToText>,
}

impl MediaRunner {
    pub fn new(asr: Arc<dyn SpeechToText>) -> Self {
        Self { asr }
    }

    /// Runner with the whisper CLI transcriber from the environment.
    pub fn from_env() -> Self {
        Self::new(Arc::new(WhisperCli::from_env()))
    }
}

#[async_trait]
impl JobRunner for MediaRunner {
    async fn run(&self, ctx: &JobContext) -> Result<JobResults, JobError> {
        let dir = ctx.attempt_dir();
        let result = self.run_stages(ctx, &dir).await;

        // Intermediates for this attempt are removed on every outcome;
        // finalize has already moved the outputs into the blob store.
        tokio::fs::remove_dir_all(&dir).await.ok();

        result
    }
}

impl MediaRunner {
    async fn run_stages(&self, ctx: &JobContext, dir: &Path) -> Result<JobResults, JobError> {
        tokio::fs::create_dir_all(dir).await.map_err(io_err)?;

        let source = ctx.store.blobs.path_for(&ctx.job.input_blob_id);
        if !source.exists() {
            return Err(JobError::new(
                clipforge_models::ErrorKind::Unreadable,
                "input blob is missing from the blob store",
            ));
        }

        // Stage 1: probe
        ctx.checkpoint()?;
        ctx.report(Stage::Probe, 0.0, "Probing media").await;
        let info = with_deadline(Stage::Probe, async {
            probe_media(&source).await.map_err(media_err)
        })
        .await?;
        if !info.codec_supported() {
            return Err(JobError::new(
                clipforge_models::ErrorKind::UnsupportedCodec,
                format!("video codec '{}' is not supported", info.video_codec),
            ));
        }
        ctx.report(Stage::Probe, 1.0, "Probe complete").await;
        ctx.checkpoint()?;

        // Stage 2: extract audio
        let audio_path = dir.join("audio.wav");
        if info.has_audio {
            ctx.report(Stage::ExtractAudio, 0.0, "Extracting audio").await;
            with_deadline(Stage::ExtractAudio, async {
                let runner = stage_runner(ctx, Stage::ExtractAudio);
                audio::extract_audio(&source, &audio_path, &runner)
                    .await
                    .map_err(media_err)
            })
            .await?;
        }
        ctx.report(Stage::ExtractAudio, 1.0, "Audio ready").await;
        ctx.checkpoint()?;

        // Stage 3: transcribe
        let transcript = if info.has_audio {
            ctx.report(Stage::Transcribe, 0.0, "Transcribing audio").await;
            with_deadline(Stage::Transcribe, async {
                self.asr.transcribe(&audio_path).await.map_err(media_err)
            })
            .await?
        } else {
            Transcript::default()
        };
        ctx.store
            .artifacts
            .put_transcript(&ctx.job.id, &transcript)
            .await
            .map_err(store_err)?;
        let transcribe_note = if transcript.is_empty() {
            "No speech detected"
        } else {
            "Transcription complete"
        };
        ctx.report(Stage::Transcribe, 1.0, transcribe_note).await;
        ctx.checkpoint()?;

        // Stage 4: score
        ctx.report(Stage::Score, 0.0, "Scoring moments").await;
        let clip_len = score::pick_clip_length(
            ctx.job.options.effective_duration_hint(),
            info.duration,
        );
        let candidates =
            score::select_candidates(&transcript, info.duration, clip_len, ctx.clip_count);
        if candidates.is_empty() {
            return Err(JobError::new(
                clipforge_models::ErrorKind::Unreadable,
                "media too short to produce any clip",
            ));
        }
        ctx.report(
            Stage::Score,
            1.0,
            format!("Selected {} moment(s)", candidates.len()),
        )
        .await;
        ctx.checkpoint()?;

        // Stage 5: cut
        let cut_paths = with_deadline(Stage::Cut, async {
            let mut paths = Vec::with_capacity(candidates.len());
            for (i, candidate) in candidates.iter().enumerate() {
                ctx.checkpoint()?;
                ctx.report(
                    Stage::Cut,
                    i as f64 / candidates.len() as f64,
                    format!("Cutting clip {}/{}", i + 1, candidates.len()),
                )
                .await;

                let path = dir.join(format!("cut_{:02}.mp4", i + 1));
                let runner = stage_runner(ctx, Stage::Cut);
                cut_clip(&source, &path, candidate.start, candidate.duration(), &runner)
                    .await
                    .map_err(media_err)?;
                paths.push(path);
            }
            Ok(paths)
        })
        .await?;
        ctx.report(Stage::Cut, 1.0, "Clips cut").await;

        // Stage 6: reframe
        let target = ctx.job.options.aspect_ratio;
        let plan = reframe::plan_reframe(info.width, info.height, target);
        let reframed_paths = with_deadline(Stage::Reframe, async {
            let mut paths = Vec::with_capacity(cut_paths.len());
            for (i, input) in cut_paths.iter().enumerate() {
                ctx.checkpoint()?;
                ctx.report(
                    Stage::Reframe,
                    i as f64 / cut_paths.len() as f64,
                    format!("Reframing clip {}/{} to {}", i + 1, cut_paths.len(), target),
                )
                .await;

                let output = dir.join(format!("reframed_{:02}.mp4", i + 1));
                let cmd = FfmpegCommand::new(input, &output)
                    .video_filter(reframe::build_filter(plan, target))
                    .output_args(["-c:v", "libx264", "-preset", "veryfast", "-crf", "20"])
                    .output_args(["-c:a", "copy"]);
                stage_runner(ctx, Stage::Reframe)
                    .run(&cmd)
                    .await
                    .map_err(media_err)?;
                paths.push(output);
            }
            Ok(paths)
        })
        .await?;
        ctx.report(Stage::Reframe, 1.0, "Reframing complete").await;

        // Stage 7: caption burn
        let want_captions = ctx.job.options.add_captions && !transcript.is_empty();
        let mut burned: Vec<bool> = vec![false; reframed_paths.len()];
        let staged_paths = if want_captions {
            with_deadline(Stage::CaptionBurn, async {
                let mut paths = Vec::with_capacity(reframed_paths.len());
                for (i, input) in reframed_paths.iter().enumerate() {
                    ctx.checkpoint()?;
                    ctx.report(
                        Stage::CaptionBurn,
                        i as f64 / reframed_paths.len() as f64,
                        format!("Burning captions {}/{}", i + 1, reframed_paths.len()),
                    )
                    .await;

                    let candidate = &candidates[i];
                    let style = ctx.job.options.caption_style;
                    match captions::render_ass(&transcript, candidate.start, candidate.end, style)
                    {
                        None => {
                            // No words inside this window; pass through
                            paths.push(input.clone());
                        }
                        Some(doc) => {
                            let ass_path = dir.join(format!("captions_{:02}.ass", i + 1));
                            tokio::fs::write(&ass_path, doc).await.map_err(io_err)?;

                            let output = dir.join(format!("captioned_{:02}.mp4", i + 1));
                            let cmd = FfmpegCommand::new(input, &output)
                                .video_filter(captions::caption_filter(&ass_path))
                                .output_args([
                                    "-c:v", "libx264", "-preset", "veryfast", "-crf", "20",
                                ])
                                .output_args(["-c:a", "copy"]);
                            stage_runner(ctx, Stage::CaptionBurn)
                                .run(&cmd)
                                .await
                                .map_err(media_err)?;
                            burned[i] = true;
                            paths.push(output);
                        }
                    }
                }
                Ok(paths)
            })
            .await?
        } else {
            reframed_paths.clone()
        };
        let caption_note = if want_captions {
            "Captions burned"
        } else if ctx.job.options.add_captions {
            "No speech detected, captions skipped"
        } else {
            "Captions not requested"
        };
        ctx.report(Stage::CaptionBurn, 1.0, caption_note).await;
        ctx.checkpoint()?;

        // Stage 8: finalize
        let settings = EncodeSettings::for_preset(ctx.job.options.quality_preset);
        let mut artifacts = Vec::with_capacity(staged_paths.len());
        with_deadline(Stage::Finalize, async {
            for (i, input) in staged_paths.iter().enumerate() {
                ctx.checkpoint()?;
                ctx.report(
                    Stage::Finalize,
                    i as f64 / staged_paths.len() as f64,
                    format!("Encoding clip {}/{}", i + 1, staged_paths.len()),
                )
                .await;

                let output = dir.join(format!("final_{:02}.mp4", i + 1));
                let cmd = FfmpegCommand::new(input, &output)
                    .output_args(settings.to_ffmpeg_args());
                stage_runner(ctx, Stage::Finalize)
                    .run(&cmd)
                    .await
                    .map_err(media_err)?;

                let (blob_id, _size) = ctx
                    .store
                    .blobs
                    .store_file(&output, "video/mp4")
                    .await
                    .map_err(store_err)?;

                artifacts.push(build_artifact(
                    &ctx.job,
                    i as u32 + 1,
                    blob_id,
                    &candidates[i],
                    burned[i],
                ));
            }
            Ok(())
        })
        .await?;

        // Registering artifact rows is the single externally visible write;
        // a cancellation observed past this point no longer wins.
        ctx.checkpoint()?;
        ctx.store
            .artifacts
            .insert_all(&artifacts)
            .await
            .map_err(store_err)?;

        info!(
            job_id = %ctx.job.id,
            clips = artifacts.len(),
            duration = info.duration,
            "pipeline finished"
        );

        Ok(JobResults {
            total_clips: artifacts.len() as u32,
            source_duration: info.duration,
            artifact_ids: artifacts.iter().map(|a| a.id.clone()).collect(),
        })
    }
}

fn build_artifact(
    job: &clipforge_models::Job,
    ordinal: u32,
    blob_id: clipforge_models::BlobId,
    candidate: &ClipCandidate,
    captions_added: bool,
) -> ClipArtifact {
    let caption_track_id = captions_added.then(|| format!("{}:{}:ass", job.id, ordinal));
    ClipArtifact {
        id: ArtifactId::new(),
        job_id: job.id.clone(),
        ordinal,
        blob_id,
        duration: candidate.duration(),
        source_start: candidate.start,
        source_end: candidate.end,
        aspect_ratio: job.options.aspect_ratio,
        captions_added,
        viral_score: candidate.score,
        caption_track_id,
    }
}

/// FFmpeg runner wired to the job's cancel flag and the stage's deadline.
fn stage_runner(ctx: &JobContext, stage: Stage) -> FfmpegRunner {
    FfmpegRunner::new()
        .with_cancel(ctx.cancel_rx.clone())
        .with_timeout(stage.deadline_secs())
}

/// Enforce a stage deadline around a unit of stage work.
async fn with_deadline<T, F>(stage: Stage, work: F) -> Result<T, JobError>
where
    F: std::future::Future<Output = Result<T, JobError>>,
{
    let deadline = Duration::from_secs(stage.deadline_secs());
    match tokio::time::timeout(deadline, work).await {
        Ok(result) => result,
        Err(_) => {
            debug!(stage = %stage, "stage deadline elapsed");
            Err(JobError::timeout(format!(
                "{} stage exceeded its {}s deadline",
                stage,
                deadline.as_secs()
            )))
        }
    }
}

fn media_err(e: MediaError) -> JobError {
    JobError::new(e.kind(), e.to_string())
}

fn store_err(e: clipforge_store::StoreError) -> JobError {
    JobError::new(e.kind(), e.to_string())
}

fn io_err(e: std::io::Error) -> JobError {
    JobError::new(clipforge_models::ErrorKind::TransientIo, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipforge_models::{BlobId, ErrorKind, JobOptions};

    #[test]
    fn media_errors_map_to_taxonomy() {
        let err = media_err(MediaError::unreadable("no video stream"));
        assert_eq!(err.kind, ErrorKind::Unreadable);
        assert!(!err.retryable);

        let err = media_err(MediaError::asr_failed("service down"));
        assert_eq!(err.kind, ErrorKind::TransientDependency);
        assert!(err.retryable);

        let err = media_err(MediaError::Timeout(30));
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.retryable);
    }

    #[tokio::test(start_paused = true)]
    async fn stage_deadline_produces_timeout_kind() {
        let result: Result<(), JobError> = with_deadline(Stage::Probe, async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.retryable);
    }

    #[test]
    fn artifact_carries_candidate_window() {
        let job = clipforge_models::Job::new(
            "user-1",
            BlobId::from_hex("ab".repeat(32)),
            JobOptions::default(),
        );
        let candidate = ClipCandidate { start: 30.0, end: 45.0, score: 7.2 };

        let artifact =
            build_artifact(&job, 2, BlobId::from_hex("cd".repeat(32)), &candidate, true);

        assert_eq!(artifact.ordinal, 2);
        assert_eq!(artifact.source_start, 30.0);
        assert_eq!(artifact.source_end, 45.0);
        assert_eq!(artifact.duration, 15.0);
        assert!(artifact.captions_added);
        assert!(artifact.caption_track_id.is_some());

        let plain = build_artifact(&job, 1, BlobId::from_hex("cd".repeat(32)), &candidate, false);
        assert!(plain.caption_track_id.is_none());
    }
}
