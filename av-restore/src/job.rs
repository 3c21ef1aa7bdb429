//! Job description and its persisted manifest.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{DenoiseDefaults, UpscaleDefaults};
use crate::utils::{filename, fs};
use crate::{Error, Result};

/// Super-resolution and re-encode parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpscaleTuning {
    pub model: String,
    pub scale: u32,
    pub tile: u32,
    pub threads: String,
    pub crf: u32,
    pub preset: String,
}

impl From<&UpscaleDefaults> for UpscaleTuning {
    fn from(d: &UpscaleDefaults) -> Self {
        Self {
            model: d.model.clone(),
            scale: d.scale,
            tile: d.tile,
            threads: d.threads.clone(),
            crf: d.crf,
            preset: d.preset.clone(),
        }
    }
}

/// Time range a noise profile is sampled from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleWindow {
    pub start: f64,
    pub length: f64,
}

/// Codec used when the audio track has to be re-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioEncoding {
    pub codec: String,
    pub bitrate: String,
}

/// Noise reduction and normalization parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenoiseTuning {
    pub strength: f64,
    pub normalize_db: f64,
    pub sample: SampleWindow,
    pub audio: AudioEncoding,
}

impl From<&DenoiseDefaults> for DenoiseTuning {
    fn from(d: &DenoiseDefaults) -> Self {
        Self {
            strength: d.strength,
            normalize_db: d.normalize_db,
            sample: SampleWindow {
                start: d.sample_start,
                length: d.sample_length,
            },
            audio: AudioEncoding {
                codec: d.audio_codec.clone(),
                bitrate: d.audio_bitrate.clone(),
            },
        }
    }
}

/// One end-to-end restoration request.
#[derive(Debug, Clone)]
pub struct Job {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Persistent directory for this input, `<work_root>/<input stem>`.
    pub work_dir: PathBuf,
    /// Segment length in whole seconds.
    pub segment_length: u64,
    pub upscale: UpscaleTuning,
    pub denoise: DenoiseTuning,
}

impl Job {
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        work_root: &Path,
        segment_length: u64,
        upscale: UpscaleTuning,
        denoise: DenoiseTuning,
    ) -> Self {
        let input = input.into();
        let work_dir = work_root.join(filename::input_stem(&input));
        Self {
            input,
            output: output.into(),
            work_dir,
            segment_length,
            upscale,
            denoise,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.segment_length == 0 {
            return Err(Error::validation("segment length must be greater than 0"));
        }
        if self.input == self.output {
            return Err(Error::validation("output must differ from input"));
        }
        if !matches!(self.upscale.scale, 2..=4) {
            return Err(Error::validation("scale must be 2, 3 or 4"));
        }
        let strength = self.denoise.strength;
        if !(strength > 0.0 && strength <= 1.0) {
            return Err(Error::validation("noise reduction strength must be in (0, 1]"));
        }
        let sample = self.denoise.sample;
        if !(sample.length > 0.0) || sample.start < 0.0 {
            return Err(Error::validation(
                "noise sample window must start at or after 0 and have a positive length",
            ));
        }
        Ok(())
    }
}

/// Current `job.json` layout version.
const MANIFEST_VERSION: u32 = 1;

/// Parameters persisted in `job.json` so later runs can be checked against them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobManifest {
    pub version: u32,
    pub input: PathBuf,
    pub segment_length: u64,
    pub model: String,
    pub scale: u32,
    pub crf: u32,
    pub preset: String,
    pub created_at: DateTime<Utc>,
}

/// Absolute form of `path` without touching the filesystem.
fn absolute_input(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

impl JobManifest {
    pub fn for_job(job: &Job) -> Self {
        Self {
            version: MANIFEST_VERSION,
            input: absolute_input(&job.input),
            segment_length: job.segment_length,
            model: job.upscale.model.clone(),
            scale: job.upscale.scale,
            crf: job.upscale.crf,
            preset: job.upscale.preset.clone(),
            created_at: Utc::now(),
        }
    }

    pub async fn load(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io_path("reading", path, e)),
        }
    }

    pub async fn store(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write_atomic(path, &json).await
    }

    /// Refuse `job` unless it renders the same segments this manifest was
    /// written for.
    ///
    /// Segments from another input, boundary layout or upscale setting would
    /// still pass their completion check and end up in the joined output.
    pub fn check(&self, job: &Job) -> Result<()> {
        if self.segment_length != job.segment_length {
            return Err(Error::SegmentLengthMismatch {
                persisted: self.segment_length,
                requested: job.segment_length,
            });
        }

        let mismatch = |field: &'static str, persisted: String, requested: String| {
            Err(Error::JobMismatch {
                work_dir: job.work_dir.clone(),
                field,
                persisted,
                requested,
            })
        };
        let input = absolute_input(&job.input);
        if self.input != input {
            return mismatch(
                "input",
                self.input.display().to_string(),
                input.display().to_string(),
            );
        }
        let upscale = &job.upscale;
        if self.model != upscale.model {
            return mismatch("model", self.model.clone(), upscale.model.clone());
        }
        if self.scale != upscale.scale {
            return mismatch("scale", self.scale.to_string(), upscale.scale.to_string());
        }
        if self.crf != upscale.crf {
            return mismatch("crf", self.crf.to_string(), upscale.crf.to_string());
        }
        if self.preset != upscale.preset {
            return mismatch("preset", self.preset.clone(), upscale.preset.clone());
        }
        Ok(())
    }

    /// Load the manifest at `path`, or create it for `job` if there is none.
    ///
    /// An existing manifest must pass [`JobManifest::check`].
    pub async fn reconcile(path: &Path, job: &Job) -> Result<Self> {
        if let Some(existing) = Self::load(path).await? {
            existing.check(job)?;
            debug!(path = %path.display(), "Reusing job manifest");
            return Ok(existing);
        }

        let manifest = Self::for_job(job);
        manifest.store(path).await?;
        info!(path = %path.display(), segment_length = job.segment_length, "Created job manifest");
        Ok(manifest)
    }
}
