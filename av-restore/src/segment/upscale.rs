//! Production collaborators for segmented upscaling.
//!
//! A segment is rendered in three tool invocations: ffmpeg extracts the
//! slice as numbered PNG frames, the super-resolution upscaler processes the
//! frame directory, and ffmpeg re-encodes the upscaled sequence at the
//! source frame rate.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use process_utils::tokio_command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::job::{AudioEncoding, UpscaleTuning};
use crate::probe::FrameRate;
use crate::process::{Stage, run_tool};
use crate::utils::fs;
use crate::{Error, Result};

use super::Segment;
use super::controller::{SegmentAssembler, SegmentTransform};
use super::layout::WorkLayout;

const FRAME_PATTERN: &str = "%08d.png";

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Renders segments with ffmpeg and a Real-ESRGAN style upscaler.
#[derive(Debug, Clone)]
pub struct UpscaleTransform {
    ffmpeg: String,
    upscaler: String,
    input: PathBuf,
    frame_rate: FrameRate,
    tuning: UpscaleTuning,
}

impl UpscaleTransform {
    pub fn new(
        ffmpeg: impl Into<String>,
        upscaler: impl Into<String>,
        input: impl Into<PathBuf>,
        frame_rate: FrameRate,
        tuning: UpscaleTuning,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            upscaler: upscaler.into(),
            input: input.into(),
            frame_rate,
            tuning,
        }
    }

    fn build_extract_args(&self, segment: &Segment, frames_dir: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-ss".to_string(),
            segment.start.to_string(),
            "-t".to_string(),
            format!("{:.3}", segment.duration()),
            "-i".to_string(),
            path_arg(&self.input),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-fps_mode".to_string(),
            "passthrough".to_string(),
            path_arg(&frames_dir.join(FRAME_PATTERN)),
        ]
    }

    fn build_upscale_args(&self, frames_dir: &Path, frames_up_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            path_arg(frames_dir),
            "-o".to_string(),
            path_arg(frames_up_dir),
            "-n".to_string(),
            self.tuning.model.clone(),
            "-s".to_string(),
            self.tuning.scale.to_string(),
            "-t".to_string(),
            self.tuning.tile.to_string(),
        ];
        if !self.tuning.threads.is_empty() {
            args.extend(["-j".to_string(), self.tuning.threads.clone()]);
        }
        args.extend(["-f".to_string(), "png".to_string()]);
        args
    }

    fn build_encode_args(&self, frames_up_dir: &Path, target: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-framerate".to_string(),
            self.frame_rate.to_string(),
            "-i".to_string(),
            path_arg(&frames_up_dir.join(FRAME_PATTERN)),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-crf".to_string(),
            self.tuning.crf.to_string(),
            "-preset".to_string(),
            self.tuning.preset.clone(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            // The target ends in `.part.mp4`; name the muxer explicitly.
            "-f".to_string(),
            "mp4".to_string(),
            path_arg(target),
        ]
    }
}

#[async_trait]
impl SegmentTransform for UpscaleTransform {
    async fn render(
        &self,
        segment: &Segment,
        layout: &WorkLayout,
        target: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let frames = layout.frames_dir();
        let frames_up = layout.frames_up_dir();

        let mut extract = tokio_command(&self.ffmpeg);
        extract.args(self.build_extract_args(segment, frames));
        run_tool(Stage::FrameExtract, extract, cancel).await?;

        let extracted = fs::count_files(frames).await?;
        if extracted == 0 {
            return Err(Error::StageToolFailure {
                stage: Stage::FrameExtract,
                tool: self.ffmpeg.clone(),
                status: "exit code 0 but produced no frames".to_string(),
                stderr_tail: String::new(),
            });
        }
        debug!(segment = segment.index, frames = extracted, "Frames extracted");

        let mut upscale = tokio_command(&self.upscaler);
        upscale.args(self.build_upscale_args(frames, frames_up));
        run_tool(Stage::Upscale, upscale, cancel).await?;

        let upscaled = fs::count_files(frames_up).await?;
        if upscaled != extracted {
            return Err(Error::StageToolFailure {
                stage: Stage::Upscale,
                tool: self.upscaler.clone(),
                status: format!("exit code 0 but produced {upscaled} of {extracted} frames"),
                stderr_tail: String::new(),
            });
        }

        let mut encode = tokio_command(&self.ffmpeg);
        encode.args(self.build_encode_args(frames_up, target));
        run_tool(Stage::Encode, encode, cancel).await?;
        Ok(())
    }
}

/// Concatenation and muxing through ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegAssembler {
    ffmpeg: String,
    audio: AudioEncoding,
}

impl FfmpegAssembler {
    pub fn new(ffmpeg: impl Into<String>, audio: AudioEncoding) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            audio,
        }
    }

    fn build_concat_args(&self, manifest: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            path_arg(manifest),
            "-c".to_string(),
            "copy".to_string(),
            path_arg(output),
        ]
    }

    fn build_mux_args(&self, video: &Path, audio_source: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-i".to_string(),
            path_arg(video),
            "-i".to_string(),
            path_arg(audio_source),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a?".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            self.audio.codec.clone(),
        ];
        if !self.audio.bitrate.is_empty() {
            args.extend(["-b:a".to_string(), self.audio.bitrate.clone()]);
        }
        args.extend(["-shortest".to_string()]);
        if let Some(format) = container_format(output) {
            args.extend(["-f".to_string(), format.to_string()]);
        }
        args.push(path_arg(output));
        args
    }
}

/// ffmpeg muxer for an output path, looking through a `.part` infix.
pub(crate) fn container_format(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "mp4" | "m4v" => Some("mp4"),
        "mkv" => Some("matroska"),
        "mov" => Some("mov"),
        "webm" => Some("webm"),
        "avi" => Some("avi"),
        _ => None,
    }
}

#[async_trait]
impl SegmentAssembler for FfmpegAssembler {
    async fn concat(&self, manifest: &Path, output: &Path, cancel: &CancellationToken) -> Result<()> {
        let mut cmd = tokio_command(&self.ffmpeg);
        cmd.args(self.build_concat_args(manifest, output));
        run_tool(Stage::Concat, cmd, cancel).await?;
        Ok(())
    }

    async fn mux_audio(
        &self,
        video: &Path,
        audio_source: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut cmd = tokio_command(&self.ffmpeg);
        cmd.args(self.build_mux_args(video, audio_source, output));
        run_tool(Stage::Mux, cmd, cancel).await?;
        Ok(())
    }
}
