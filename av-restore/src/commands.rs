use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use av_restore::config::AppConfig;
use av_restore::drift::TempoDecision;
use av_restore::job::{DenoiseTuning, Job, UpscaleTuning};
use av_restore::probe::{FfprobeProbe, MediaProbe};
use av_restore::segment::SegmentStatus;
use av_restore::toolchain::{Tool, ensure_available};
use av_restore::utils::filename::derived_output;
use av_restore::workflow;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cli::{Commands, SegmentArgs};
use crate::progress::{spawn_segment_progress, spinner};

pub struct CommandExecutor {
    config: AppConfig,
    cancel: CancellationToken,
    show_progress: bool,
}

impl CommandExecutor {
    pub fn new(config: AppConfig, cancel: CancellationToken, show_progress: bool) -> Self {
        Self {
            config,
            cancel,
            show_progress,
        }
    }

    fn probe(&self) -> Arc<FfprobeProbe> {
        Arc::new(FfprobeProbe::new(
            &self.config.tools.ffprobe,
            self.cancel.clone(),
        ))
    }

    async fn require(&self, tools: &[Tool]) -> Result<()> {
        ensure_available(&self.config.tools, tools).await?;
        Ok(())
    }

    fn job(&self, input: &Path, output: PathBuf, segment_length: Option<u64>) -> Job {
        Job::new(
            input,
            output,
            &self.config.work_root,
            segment_length.unwrap_or(self.config.upscale.segment_length),
            UpscaleTuning::from(&self.config.upscale),
            DenoiseTuning::from(&self.config.denoise),
        )
    }

    pub async fn execute(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Upscale {
                input,
                output,
                segments,
                tile,
                model,
                scale,
                crf,
                preset,
            } => {
                check_input(&input)?;
                let output =
                    output.unwrap_or_else(|| derived_output(&input, "upscaled", Some("mp4")));
                let mut job = self.job(&input, output, segments.segment_length);
                if let Some(tile) = tile {
                    job.upscale.tile = tile;
                }
                if let Some(model) = model {
                    job.upscale.model = model;
                }
                if let Some(scale) = scale {
                    job.upscale.scale = scale;
                }
                if let Some(crf) = crf {
                    job.upscale.crf = crf;
                }
                if let Some(preset) = preset {
                    job.upscale.preset = preset;
                }
                self.upscale(job).await
            }
            Commands::Denoise {
                input,
                output,
                strength,
                normalize,
                sample_start,
                sample_length,
            } => {
                check_input(&input)?;
                let output = output.unwrap_or_else(|| derived_output(&input, "denoised", None));
                let mut job = self.job(&input, output, None);
                if let Some(strength) = strength {
                    job.denoise.strength = strength;
                }
                if let Some(normalize) = normalize {
                    job.denoise.normalize_db = normalize;
                }
                if let Some(start) = sample_start {
                    job.denoise.sample.start = start;
                }
                if let Some(length) = sample_length {
                    job.denoise.sample.length = length;
                }
                self.denoise(job).await
            }
            Commands::Sync { input, output } => {
                check_input(&input)?;
                let output = output.unwrap_or_else(|| derived_output(&input, "synced", None));
                self.sync(self.job(&input, output, None)).await
            }
            Commands::Plan { input, segments } => {
                check_input(&input)?;
                self.plan(&input, segments).await
            }
            Commands::Probe { input } => {
                check_input(&input)?;
                self.require(&[Tool::Ffprobe]).await?;
                let info = self.probe().probe(&input).await?;
                println!("{}", serde_json::to_string_pretty(&info)?);
                Ok(())
            }
            Commands::Clean { input } => {
                let job = self.job(&input, PathBuf::new(), None);
                if workflow::clean(&job.work_dir).await? {
                    println!("Removed {}", job.work_dir.display());
                } else {
                    println!("Nothing to clean at {}", job.work_dir.display());
                }
                Ok(())
            }
        }
    }

    async fn upscale(&self, job: Job) -> Result<()> {
        self.require(&[Tool::Ffmpeg, Tool::Ffprobe, Tool::Realesrgan])
            .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let progress = spawn_segment_progress(rx, self.show_progress);
        let outcome =
            workflow::upscale(&job, &self.config.tools, self.probe(), Some(tx), self.cancel.clone())
                .await;
        let _ = progress.await;

        let outcome = outcome.with_context(|| format!("upscaling {}", job.input.display()))?;
        println!(
            "Upscaled {} ({} segments, {} rendered, {} reused) -> {}",
            job.input.display(),
            outcome.summary.planned,
            outcome.summary.processed,
            outcome.summary.skipped,
            outcome.output.display()
        );
        Ok(())
    }

    async fn denoise(&self, job: Job) -> Result<()> {
        self.require(&[Tool::Ffmpeg, Tool::Ffprobe, Tool::Sox]).await?;

        let pb = spinner("Reducing noise...", self.show_progress);
        let probe = self.probe();
        let report = workflow::denoise(&job, &self.config.tools, probe.as_ref(), self.cancel.clone())
            .await;
        pb.finish_and_clear();

        let report = report.with_context(|| format!("denoising {}", job.input.display()))?;
        let mode = if report.mono { "mono" } else { "channel-split" };
        println!(
            "Denoised {} channel(s) ({mode}) -> {}",
            report.channels,
            report.output.display()
        );
        Ok(())
    }

    async fn sync(&self, job: Job) -> Result<()> {
        self.require(&[Tool::Ffmpeg, Tool::Ffprobe]).await?;

        let probe = self.probe();
        let decision = workflow::sync(&job, &self.config.tools, probe.as_ref(), self.cancel.clone())
            .await
            .with_context(|| format!("correcting drift of {}", job.input.display()))?;
        match decision {
            TempoDecision::Negligible { factor } => {
                println!("Drift factor {factor:.5} is negligible, no correction needed");
            }
            TempoDecision::Correct { factor } => {
                println!(
                    "Applied tempo factor {factor:.5} -> {}",
                    job.output.display()
                );
            }
        }
        Ok(())
    }

    async fn plan(&self, input: &Path, segments: SegmentArgs) -> Result<()> {
        self.require(&[Tool::Ffprobe]).await?;

        let job = self.job(input, PathBuf::new(), segments.segment_length);
        let probe = self.probe();
        let planned = workflow::plan(&job, probe.as_ref()).await?;
        let complete = planned
            .iter()
            .filter(|s| s.status == SegmentStatus::Complete)
            .count();

        println!(
            "{} segments of {}s, {} complete (work dir: {})",
            planned.len(),
            job.segment_length,
            complete,
            job.work_dir.display()
        );
        for segment in &planned {
            println!(
                "  {:>6}  [{:>8}s, {:>10.3}s)  {}",
                segment.index, segment.start, segment.end, segment.status
            );
        }
        Ok(())
    }
}

fn check_input(input: &Path) -> Result<()> {
    if !input.is_file() {
        bail!("input file {} does not exist", input.display());
    }
    Ok(())
}
