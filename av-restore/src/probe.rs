//! Media probing through `ffprobe`.
//!
//! Channel count and sample rate degrade to safe defaults when they cannot be
//! read; duration and frame rate never do, since every segment boundary and
//! encode depends on them.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::process::{Stage, run_tool};
use crate::{Error, Result};

/// Channel count assumed when the audio stream does not report one.
pub const DEFAULT_CHANNELS: u32 = 2;
/// Sample rate assumed when the audio stream does not report one.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Source of media facts for the orchestrator.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;

    /// Duration of the whole file in seconds.
    async fn duration(&self, path: &Path) -> Result<f64> {
        self.probe(path).await?.duration()
    }
}

/// Rational frame rate as reported by ffprobe (`30000/1001`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn as_f64(&self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for FrameRate {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (num, den) = match s.split_once('/') {
            Some((n, d)) => (n.trim(), d.trim()),
            None => (s, "1"),
        };
        let num: u32 = num
            .parse()
            .map_err(|_| format!("invalid frame rate '{s}'"))?;
        let den: u32 = den
            .parse()
            .map_err(|_| format!("invalid frame rate '{s}'"))?;
        if num == 0 || den == 0 {
            return Err(format!("invalid frame rate '{s}'"));
        }
        Ok(Self { num, den })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioStreamInfo {
    pub channels: Option<u32>,
    pub sample_rate: Option<u32>,
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoStreamInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<FrameRate>,
    pub duration: Option<f64>,
}

/// Probe report for one media file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub stream_count: usize,
    /// First audio stream.
    pub audio: Option<AudioStreamInfo>,
    /// First video stream.
    pub video: Option<VideoStreamInfo>,
    pub container_duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

impl FfprobeStream {
    /// Stream length, or the `DURATION` tag Matroska muxers write instead.
    fn duration(&self) -> Option<f64> {
        parse_seconds(self.duration.as_deref()).or_else(|| {
            self.tags
                .iter()
                .filter(|(key, _)| key.to_ascii_uppercase().starts_with("DURATION"))
                .find_map(|(_, value)| parse_timestamp(value))
        })
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

fn parse_seconds(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// `HH:MM:SS.fraction` -> seconds.
fn parse_timestamp(value: &str) -> Option<f64> {
    let mut parts = value.trim().splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    (total.is_finite() && total > 0.0).then_some(total)
}

impl MediaInfo {
    /// Build a report from `ffprobe -print_format json -show_format -show_streams` output.
    pub fn from_ffprobe_json(path: &Path, json: &str) -> Result<Self> {
        let parsed: FfprobeOutput = serde_json::from_str(json)
            .map_err(|e| Error::probe(path, format!("unreadable ffprobe output: {e}")))?;

        let audio = parsed
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("audio"))
            .map(|s| AudioStreamInfo {
                channels: s.channels.filter(|c| *c > 0),
                sample_rate: s
                    .sample_rate
                    .as_deref()
                    .and_then(|r| r.trim().parse::<u32>().ok())
                    .filter(|r| *r > 0),
                duration: s.duration(),
            });

        let video = parsed
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .map(|s| VideoStreamInfo {
                width: s.width,
                height: s.height,
                frame_rate: s
                    .r_frame_rate
                    .as_deref()
                    .and_then(|r| r.parse().ok())
                    .or_else(|| s.avg_frame_rate.as_deref().and_then(|r| r.parse().ok())),
                duration: s.duration(),
            });

        Ok(Self {
            path: path.to_path_buf(),
            stream_count: parsed.streams.len(),
            audio,
            video,
            container_duration: parse_seconds(
                parsed.format.as_ref().and_then(|f| f.duration.as_deref()),
            ),
        })
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// Container duration, falling back to the longest stream duration.
    pub fn duration(&self) -> Result<f64> {
        self.container_duration
            .or_else(|| {
                let a = self.audio.as_ref().and_then(|a| a.duration);
                let v = self.video.as_ref().and_then(|v| v.duration);
                match (a, v) {
                    (Some(a), Some(v)) => Some(a.max(v)),
                    (a, v) => a.or(v),
                }
            })
            .ok_or_else(|| Error::probe(&self.path, "duration is unavailable"))
    }

    /// Length of the audio stream itself.
    ///
    /// Never substituted by the container duration: drift is measured
    /// between the two streams, and the container only knows the longer one.
    pub fn audio_duration(&self) -> Result<f64> {
        let audio = self
            .audio
            .as_ref()
            .ok_or_else(|| Error::probe(&self.path, "no audio stream"))?;
        audio
            .duration
            .ok_or_else(|| Error::probe(&self.path, "audio stream reports no duration"))
    }

    /// Length of the video stream itself, see [`MediaInfo::audio_duration`].
    pub fn video_duration(&self) -> Result<f64> {
        let video = self
            .video
            .as_ref()
            .ok_or_else(|| Error::probe(&self.path, "no video stream"))?;
        video
            .duration
            .ok_or_else(|| Error::probe(&self.path, "video stream reports no duration"))
    }

    pub fn frame_rate(&self) -> Result<FrameRate> {
        self.video
            .as_ref()
            .and_then(|v| v.frame_rate)
            .ok_or_else(|| Error::probe(&self.path, "frame rate is unavailable"))
    }

    pub fn channels(&self) -> u32 {
        match self.audio.as_ref().and_then(|a| a.channels) {
            Some(c) => c,
            None => {
                warn!(path = %self.path.display(), "Channel count unavailable, assuming {}", DEFAULT_CHANNELS);
                DEFAULT_CHANNELS
            }
        }
    }

    pub fn sample_rate(&self) -> u32 {
        match self.audio.as_ref().and_then(|a| a.sample_rate) {
            Some(r) => r,
            None => {
                warn!(path = %self.path.display(), "Sample rate unavailable, assuming {}", DEFAULT_SAMPLE_RATE);
                DEFAULT_SAMPLE_RATE
            }
        }
    }
}

/// [`MediaProbe`] backed by the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    binary: String,
    cancel: CancellationToken,
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            binary: binary.into(),
            cancel,
        }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let mut cmd = process_utils::tokio_command(&self.binary);
        cmd.args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path);

        let stdout = run_tool(Stage::Probe, cmd, &self.cancel)
            .await
            .map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                other => Error::probe(path, other.to_string()),
            })?;

        let json = String::from_utf8_lossy(&stdout);
        let info = MediaInfo::from_ffprobe_json(path, &json)?;
        debug!(path = %path.display(), streams = info.stream_count, "Probed media");
        Ok(info)
    }
}
