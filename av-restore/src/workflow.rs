//! End-to-end operations behind each CLI sub-command.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::channels::{AudioLayout, ChannelSplitPipeline, FfmpegSoxCommands, PipelineReport};
use crate::config::ToolPaths;
use crate::drift::{TempoDecision, apply_tempo, compute_tempo};
use crate::job::{Job, JobManifest};
use crate::probe::MediaProbe;
use crate::segment::{
    FfmpegAssembler, RunSummary, Segment, SegmentController, SegmentEvent, UpscaleTransform,
    WorkLayout, plan_with_status,
};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct UpscaleOutcome {
    pub summary: RunSummary,
    pub output: std::path::PathBuf,
}

/// Segmented upscale: resume, render what is missing, concatenate, mux audio.
pub async fn upscale(
    job: &Job,
    tools: &ToolPaths,
    probe: Arc<dyn MediaProbe>,
    events: Option<mpsc::UnboundedSender<SegmentEvent>>,
    cancel: CancellationToken,
) -> Result<UpscaleOutcome> {
    job.validate()?;

    let info = probe.probe(&job.input).await?;
    let total = info.duration()?;
    let frame_rate = info.frame_rate()?;
    info!(
        input = %job.input.display(),
        duration = total,
        %frame_rate,
        segment_length = job.segment_length,
        "Starting upscale"
    );

    let layout = WorkLayout::new(&job.work_dir);
    layout.prepare().await?;
    JobManifest::reconcile(&layout.job_manifest(), job).await?;

    let transform = UpscaleTransform::new(
        &tools.ffmpeg,
        &tools.realesrgan,
        &job.input,
        frame_rate,
        job.upscale.clone(),
    );
    let assembler = FfmpegAssembler::new(&tools.ffmpeg, job.denoise.audio.clone());
    let mut controller = SegmentController::new(
        layout,
        probe,
        Arc::new(transform),
        Arc::new(assembler),
        cancel,
    );
    if let Some(tx) = events {
        controller = controller.with_events(tx);
    }

    let summary = controller.run(total, job.segment_length).await?;
    let output = controller
        .finalize(&job.input, &job.output, Some(summary.planned as u64))
        .await?;
    Ok(UpscaleOutcome { summary, output })
}

/// Segment boundaries of `job` and which of them are already complete.
///
/// Nothing is written; a persisted manifest the job does not match is still
/// reported as an error.
pub async fn plan(job: &Job, probe: &dyn MediaProbe) -> Result<Vec<Segment>> {
    job.validate()?;
    let layout = WorkLayout::new(&job.work_dir);
    if let Some(manifest) = JobManifest::load(&layout.job_manifest()).await? {
        manifest.check(job)?;
    }

    let total = probe.duration(&job.input).await?;
    plan_with_status(&layout, probe, total, job.segment_length).await
}

/// Channel-split noise reduction of the whole input.
pub async fn denoise(
    job: &Job,
    tools: &ToolPaths,
    probe: &dyn MediaProbe,
    cancel: CancellationToken,
) -> Result<PipelineReport> {
    job.validate()?;

    let info = probe.probe(&job.input).await?;
    if !info.has_audio() {
        return Err(Error::probe(&job.input, "no audio stream"));
    }
    let duration = info.audio_duration().or_else(|_| info.duration())?;
    let window = job.denoise.sample;
    if window.start + window.length > duration {
        return Err(Error::validation(format!(
            "noise sample window {:.3}s+{:.3}s exceeds audio duration {duration:.3}s",
            window.start, window.length
        )));
    }

    let audio = AudioLayout {
        channels: info.channels(),
        sample_rate: info.sample_rate(),
    };
    info!(
        input = %job.input.display(),
        channels = audio.channels,
        sample_rate = audio.sample_rate,
        "Starting noise reduction"
    );

    let commands = FfmpegSoxCommands::new(&tools.ffmpeg, &tools.sox, &job.input, job.denoise.clone());
    let pipeline = ChannelSplitPipeline::new(Arc::new(commands), window, &job.work_dir, cancel);
    pipeline.run(audio, &job.output).await
}

/// Measure audio/video drift and correct it when needed.
pub async fn sync(
    job: &Job,
    tools: &ToolPaths,
    probe: &dyn MediaProbe,
    cancel: CancellationToken,
) -> Result<TempoDecision> {
    let info = probe.probe(&job.input).await?;
    let audio = info.audio_duration()?;
    let video = info.video_duration()?;
    let decision = compute_tempo(audio, video)?;

    match decision {
        TempoDecision::Negligible { factor } => {
            info!(factor, "Drift is negligible, no correction needed");
        }
        TempoDecision::Correct { factor } => {
            info!(factor, audio, video, "Correcting drift");
            apply_tempo(
                &tools.ffmpeg,
                &job.input,
                &job.output,
                factor,
                &job.denoise.audio,
                &cancel,
            )
            .await?;
        }
    }
    Ok(decision)
}

/// Remove the persistent work directory of `job`. Returns whether it existed.
pub async fn clean(work_dir: &Path) -> Result<bool> {
    match tokio::fs::remove_dir_all(work_dir).await {
        Ok(()) => {
            info!(path = %work_dir.display(), "Removed work directory");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io_path("removing", work_dir, e)),
    }
}
