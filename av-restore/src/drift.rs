//! Audio/video drift (tempo) correction.

use std::path::Path;

use process_utils::tokio_command;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::job::AudioEncoding;
use crate::process::{Stage, run_tool};
use crate::segment::upscale::container_format;
use crate::utils::fs;
use crate::{Error, Result};

/// Below this relative drift no correction is applied.
pub const NEGLIGIBLE_DRIFT: f64 = 0.0005;
pub const MIN_TEMPO: f64 = 0.5;
pub const MAX_TEMPO: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum TempoDecision {
    /// Drift is within tolerance; the streams are left alone.
    Negligible { factor: f64 },
    /// Audio must be time-scaled by `factor`.
    Correct { factor: f64 },
}

impl TempoDecision {
    pub fn factor(&self) -> f64 {
        match self {
            Self::Negligible { factor } | Self::Correct { factor } => *factor,
        }
    }
}

/// `audio / video`, classified.
///
/// A factor outside `[0.5, 2.0]` points at a capture problem (wrong frame
/// rate, truncated file) rather than drift and is refused.
pub fn compute_tempo(audio_duration: f64, video_duration: f64) -> Result<TempoDecision> {
    for (name, value) in [("audio", audio_duration), ("video", video_duration)] {
        if !value.is_finite() || value <= 0.0 {
            return Err(Error::validation(format!(
                "{name} duration must be positive, got {value}"
            )));
        }
    }

    let factor = audio_duration / video_duration;
    if (factor - 1.0).abs() < NEGLIGIBLE_DRIFT {
        return Ok(TempoDecision::Negligible { factor });
    }
    if !(MIN_TEMPO..=MAX_TEMPO).contains(&factor) {
        return Err(Error::DriftOutOfRange { factor });
    }
    Ok(TempoDecision::Correct { factor })
}

/// ffmpeg filter for a tempo factor.
pub fn tempo_filter(factor: f64) -> String {
    format!("atempo={factor:.6},asetpts=PTS-STARTPTS")
}

fn build_tempo_args(input: &Path, output: &Path, factor: f64, audio: &AudioEncoding) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-nostats".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-map".to_string(),
        "0:v?".to_string(),
        "-map".to_string(),
        "0:a:0".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-af".to_string(),
        tempo_filter(factor),
        "-c:a".to_string(),
        audio.codec.clone(),
    ];
    if !audio.bitrate.is_empty() {
        args.extend(["-b:a".to_string(), audio.bitrate.clone()]);
    }
    if let Some(format) = container_format(output) {
        args.extend(["-f".to_string(), format.to_string()]);
    }
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Time-scale the audio of `input` by `factor` into `output`, copying video.
pub async fn apply_tempo(
    ffmpeg: &str,
    input: &Path,
    output: &Path,
    factor: f64,
    audio: &AudioEncoding,
    cancel: &CancellationToken,
) -> Result<()> {
    fs::ensure_parent_dir(output).await?;
    let part = fs::part_path(output);
    fs::remove_file_if_exists(&part).await?;

    let mut cmd = tokio_command(ffmpeg);
    cmd.args(build_tempo_args(input, &part, factor, audio));
    if let Err(e) = run_tool(Stage::Tempo, cmd, cancel).await {
        let _ = fs::remove_file_if_exists(&part).await;
        return Err(e);
    }

    fs::promote(&part, output).await?;
    info!(output = %output.display(), factor, "Tempo corrected");
    Ok(())
}
