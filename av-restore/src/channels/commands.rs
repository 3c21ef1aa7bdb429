//! Command lines for each role in the channel pipeline.
//!
//! Samples travel between processes as raw little-endian 32-bit float PCM.
//! The trait only builds commands; wiring their stdio together and
//! supervising them is the pipeline's job.

use std::path::{Path, PathBuf};

use process_utils::tokio_command;
use tokio::process::Command;

use crate::job::{DenoiseTuning, SampleWindow};
use crate::segment::upscale::container_format;

/// Builds the processes of the channel pipeline.
pub trait ChannelCommands: Send + Sync {
    /// Emit `window` of `channel` on stdout as mono raw samples.
    fn profile_extract(&self, channel: usize, window: SampleWindow, sample_rate: u32) -> Command;

    /// Read mono raw samples on stdin and write a noise profile to `profile`.
    fn profile_build(&self, profile: &Path, sample_rate: u32) -> Command;

    /// Emit the full length of `channel` on stdout as mono raw samples.
    fn channel_extract(&self, channel: usize, sample_rate: u32) -> Command;

    /// Filter mono raw samples from stdin to stdout using `profile`.
    fn channel_filter(&self, profile: &Path, sample_rate: u32, scratch: &Path) -> Command;

    /// Read `channels` interleaved raw channels on stdin, combine them with
    /// the source video and write `output`.
    fn merge(&self, channels: u32, sample_rate: u32, output: &Path) -> Command;

    /// Filter mono raw samples from stdin into the audio file `output`.
    fn filter_to_file(
        &self,
        profile: &Path,
        sample_rate: u32,
        scratch: &Path,
        output: &Path,
    ) -> Command;

    /// Combine the audio file `audio` with the source video into `output`.
    fn mux_audio(&self, audio: &Path, output: &Path) -> Command;
}

/// [`ChannelCommands`] using ffmpeg for demux/mux and sox for filtering.
#[derive(Debug, Clone)]
pub struct FfmpegSoxCommands {
    ffmpeg: String,
    sox: String,
    input: PathBuf,
    tuning: DenoiseTuning,
}

impl FfmpegSoxCommands {
    pub fn new(
        ffmpeg: impl Into<String>,
        sox: impl Into<String>,
        input: impl Into<PathBuf>,
        tuning: DenoiseTuning,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            sox: sox.into(),
            input: input.into(),
            tuning,
        }
    }

    fn ffmpeg(&self) -> Command {
        let mut cmd = tokio_command(&self.ffmpeg);
        cmd.args(["-y", "-hide_banner", "-nostats", "-loglevel", "error"]);
        cmd
    }

    fn sox(&self) -> Command {
        let mut cmd = tokio_command(&self.sox);
        cmd.args(["-V1"]);
        cmd
    }

    /// ffmpeg output options selecting one channel of the first audio stream.
    fn single_channel_output(cmd: &mut Command, channel: usize, sample_rate: u32) {
        cmd.args(["-map", "0:a:0", "-vn", "-af"])
            .arg(format!("pan=mono|c0=c{channel}"))
            .args(["-ac", "1", "-ar"])
            .arg(sample_rate.to_string())
            .args(["-f", "f32le", "pipe:1"]);
    }

    fn finish_container(&self, cmd: &mut Command, output: &Path) {
        cmd.args(["-map", "1:v?", "-map", "0:a", "-c:v", "copy", "-c:a"])
            .arg(&self.tuning.audio.codec);
        if !self.tuning.audio.bitrate.is_empty() {
            cmd.arg("-b:a").arg(&self.tuning.audio.bitrate);
        }
        if let Some(format) = container_format(output) {
            cmd.args(["-f", format]);
        }
        cmd.arg(output);
    }
}

/// sox format options for mono raw f32le at `sample_rate`.
fn raw_mono(sample_rate: u32) -> [String; 10] {
    [
        "-t".to_string(),
        "raw".to_string(),
        "-e".to_string(),
        "floating-point".to_string(),
        "-b".to_string(),
        "32".to_string(),
        "-L".to_string(),
        "-r".to_string(),
        sample_rate.to_string(),
        "-c1".to_string(),
    ]
}

impl ChannelCommands for FfmpegSoxCommands {
    fn profile_extract(&self, channel: usize, window: SampleWindow, sample_rate: u32) -> Command {
        let mut cmd = self.ffmpeg();
        cmd.arg("-ss")
            .arg(format!("{:.3}", window.start))
            .arg("-t")
            .arg(format!("{:.3}", window.length))
            .arg("-i")
            .arg(&self.input);
        Self::single_channel_output(&mut cmd, channel, sample_rate);
        cmd
    }

    fn profile_build(&self, profile: &Path, sample_rate: u32) -> Command {
        let mut cmd = self.sox();
        cmd.args(raw_mono(sample_rate))
            .args(["-", "-n", "noiseprof"])
            .arg(profile);
        cmd
    }

    fn channel_extract(&self, channel: usize, sample_rate: u32) -> Command {
        let mut cmd = self.ffmpeg();
        cmd.arg("-i").arg(&self.input);
        Self::single_channel_output(&mut cmd, channel, sample_rate);
        cmd
    }

    fn channel_filter(&self, profile: &Path, sample_rate: u32, scratch: &Path) -> Command {
        let mut cmd = self.sox();
        cmd.arg("--temp")
            .arg(scratch)
            .args(raw_mono(sample_rate))
            .arg("-")
            .args(raw_mono(sample_rate))
            .arg("-")
            .arg("noisered")
            .arg(profile)
            .arg(self.tuning.strength.to_string())
            .arg("norm")
            .arg(self.tuning.normalize_db.to_string());
        cmd
    }

    fn merge(&self, channels: u32, sample_rate: u32, output: &Path) -> Command {
        let mut cmd = self.ffmpeg();
        cmd.args(["-f", "f32le", "-ar"])
            .arg(sample_rate.to_string())
            .arg("-ac")
            .arg(channels.to_string())
            .args(["-i", "pipe:0", "-i"])
            .arg(&self.input);
        self.finish_container(&mut cmd, output);
        cmd
    }

    fn filter_to_file(
        &self,
        profile: &Path,
        sample_rate: u32,
        scratch: &Path,
        output: &Path,
    ) -> Command {
        let mut cmd = self.sox();
        cmd.arg("--temp")
            .arg(scratch)
            .args(raw_mono(sample_rate))
            .arg("-")
            .args(["-t", "wav", "-e", "floating-point", "-b", "32"])
            .arg(output)
            .arg("noisered")
            .arg(profile)
            .arg(self.tuning.strength.to_string())
            .arg("norm")
            .arg(self.tuning.normalize_db.to_string());
        cmd
    }

    fn mux_audio(&self, audio: &Path, output: &Path) -> Command {
        let mut cmd = self.ffmpeg();
        cmd.arg("-i").arg(audio).arg("-i").arg(&self.input);
        self.finish_container(&mut cmd, output);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DenoiseDefaults;

    fn commands() -> FfmpegSoxCommands {
        FfmpegSoxCommands::new(
            "ffmpeg",
            "sox",
            "/in/tape.mkv",
            DenoiseTuning::from(&DenoiseDefaults::default()),
        )
    }

    fn args(cmd: &Command) -> String {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn channel_extract_selects_one_channel() {
        let cmd = commands().channel_extract(3, 48_000);
        let args = args(&cmd);
        assert!(args.contains("-i /in/tape.mkv -map 0:a:0 -vn -af pan=mono|c0=c3"));
        assert!(args.ends_with("-ac 1 -ar 48000 -f f32le pipe:1"));
    }

    #[test]
    fn profile_extract_limits_to_window() {
        let window = SampleWindow {
            start: 2.5,
            length: 1.0,
        };
        let args = args(&commands().profile_extract(0, window, 44_100));
        assert!(args.contains("-ss 2.500 -t 1.000 -i /in/tape.mkv"));
    }

    #[test]
    fn filter_applies_profile_then_normalizes() {
        let cmd = commands().channel_filter(Path::new("/s/p0.prof"), 48_000, Path::new("/s/t0"));
        let args = args(&cmd);
        assert!(args.starts_with("-V1 --temp /s/t0 -t raw"));
        assert!(args.ends_with("noisered /s/p0.prof 0.21 norm -1"));
    }

    #[test]
    fn merge_reads_interleaved_stdin_and_copies_video() {
        let cmd = commands().merge(6, 48_000, Path::new("/out/tape_denoised.part.mkv"));
        let args = args(&cmd);
        assert!(args.contains("-f f32le -ar 48000 -ac 6 -i pipe:0 -i /in/tape.mkv"));
        assert!(args.contains("-map 1:v? -map 0:a -c:v copy -c:a aac -b:a 192k"));
        assert!(args.ends_with("-f matroska /out/tape_denoised.part.mkv"));
    }
}
