//! Channel-split pipeline against small shell stand-ins for ffmpeg and sox.
//!
//! Channel `c` emits samples whose bytes are all `c + 1`, filtering is `cat`
//! and merging writes the interleaved stream straight to the output, so the
//! output file shows exactly how channels were routed.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use av_restore::Error;
use av_restore::channels::{AudioLayout, ChannelCommands, ChannelSplitPipeline};
use av_restore::job::SampleWindow;
use av_restore::process::Stage;
use process_utils::tokio_command;
use tempfile::TempDir;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const SAMPLE_BYTES: usize = 4;

#[derive(Default)]
struct ShCommands {
    /// Samples emitted per channel.
    frames: Vec<usize>,
    /// Channel whose extractor exits with an error right away.
    failing: Option<usize>,
    /// Extractors of healthy channels never finish.
    hang: bool,
    /// Profile builders consume input but write nothing.
    empty_profiles: bool,
    /// The merge process exits with an error without reading its input.
    failing_merge: bool,
}

fn sh(script: &str, args: &[&Path]) -> Command {
    let mut cmd = tokio_command("sh");
    cmd.args(["-c", script, "sh"]).args(args);
    cmd
}

impl ChannelCommands for ShCommands {
    fn profile_extract(&self, _channel: usize, _window: SampleWindow, _rate: u32) -> Command {
        sh("printf noise", &[])
    }

    fn profile_build(&self, profile: &Path, _rate: u32) -> Command {
        if self.empty_profiles {
            sh("cat > /dev/null", &[])
        } else {
            sh("cat > \"$1\"", &[profile])
        }
    }

    fn channel_extract(&self, channel: usize, _rate: u32) -> Command {
        if self.failing == Some(channel) {
            return sh("exit 3", &[]);
        }
        if self.hang {
            return sh("exec sleep 30", &[]);
        }
        let bytes = self.frames[channel] * SAMPLE_BYTES;
        let script = format!(
            "head -c {bytes} /dev/zero | tr '\\000' '\\{:03o}'",
            channel + 1
        );
        sh(&script, &[])
    }

    fn channel_filter(&self, profile: &Path, _rate: u32, _scratch: &Path) -> Command {
        sh("test -s \"$1\" && exec cat", &[profile])
    }

    fn merge(&self, _channels: u32, _rate: u32, output: &Path) -> Command {
        if self.failing_merge {
            return sh("exit 1", &[]);
        }
        sh("cat > \"$1\"", &[output])
    }

    fn filter_to_file(&self, profile: &Path, _rate: u32, _scratch: &Path, output: &Path) -> Command {
        sh("test -s \"$1\" && cat > \"$2\"", &[profile, output])
    }

    fn mux_audio(&self, audio: &Path, output: &Path) -> Command {
        sh("cp \"$1\" \"$2\"", &[audio, output])
    }
}

struct Fixture {
    temp: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
        }
    }

    fn scratch_root(&self) -> PathBuf {
        self.temp.path().join("scratch")
    }

    fn output(&self) -> PathBuf {
        self.temp.path().join("tape_denoised.mkv")
    }

    fn pipeline(&self, commands: ShCommands) -> ChannelSplitPipeline {
        ChannelSplitPipeline::new(
            Arc::new(commands),
            SampleWindow {
                start: 0.0,
                length: 1.0,
            },
            self.scratch_root(),
            CancellationToken::new(),
        )
    }

    fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(self.scratch_root()).unwrap().next().is_none()
    }
}

/// The failure that triggered cancellation, looking through aggregation.
fn primary(err: Error) -> Error {
    match err {
        Error::Aggregate { primary, .. } => *primary,
        other => other,
    }
}

fn layout(channels: u32) -> AudioLayout {
    AudioLayout {
        channels,
        sample_rate: 48_000,
    }
}

#[tokio::test]
async fn keeps_channel_order_and_pads_short_channels() {
    let fx = Fixture::new();
    let frames = vec![1000, 1000, 600];
    let pipeline = fx.pipeline(ShCommands {
        frames: frames.clone(),
        ..ShCommands::default()
    });

    let report = pipeline.run(layout(3), &fx.output()).await.unwrap();
    assert_eq!(report.channels, 3);
    assert!(!report.mono);

    let bytes = std::fs::read(fx.output()).unwrap();
    assert_eq!(bytes.len(), 1000 * 3 * SAMPLE_BYTES);
    for (i, sample) in bytes.chunks_exact(SAMPLE_BYTES).enumerate() {
        let (frame, channel) = (i / 3, i % 3);
        let expected = if frame < frames[channel] {
            channel as u8 + 1
        } else {
            0
        };
        assert!(
            sample.iter().all(|b| *b == expected),
            "frame {frame} channel {channel}: {sample:?}"
        );
    }

    assert!(fx.scratch_is_empty());
    assert!(!fx.temp.path().join("tape_denoised.part.mkv").exists());
}

#[tokio::test]
async fn spans_multiple_blocks() {
    let fx = Fixture::new();
    let frames = vec![20_000, 20_000];
    let pipeline = fx.pipeline(ShCommands {
        frames,
        ..ShCommands::default()
    });

    pipeline.run(layout(2), &fx.output()).await.unwrap();
    let bytes = std::fs::read(fx.output()).unwrap();
    assert_eq!(bytes.len(), 20_000 * 2 * SAMPLE_BYTES);
    let last = &bytes[bytes.len() - 2 * SAMPLE_BYTES..];
    assert_eq!(last, &[1, 1, 1, 1, 2, 2, 2, 2]);
}

#[tokio::test]
async fn failed_worker_tears_down_the_tree() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline(ShCommands {
        frames: vec![0; 4],
        failing: Some(1),
        hang: true,
        ..ShCommands::default()
    });

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        pipeline.run(layout(4), &fx.output()),
    )
    .await
    .expect("pipeline must not hang after a worker failure");

    match primary(result.unwrap_err()) {
        Error::WorkerFailure { channel, stage, .. } => {
            assert_eq!(channel, 1);
            assert_eq!(stage, Stage::ChannelExtract);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!fx.output().exists());
    assert!(!fx.temp.path().join("tape_denoised.part.mkv").exists());
    assert!(fx.scratch_is_empty());
}

#[tokio::test]
async fn failed_merge_tears_down_the_workers() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline(ShCommands {
        frames: vec![0; 3],
        hang: true,
        failing_merge: true,
        ..ShCommands::default()
    });

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        pipeline.run(layout(3), &fx.output()),
    )
    .await
    .expect("pipeline must not hang after the merge stage fails");

    match primary(result.unwrap_err()) {
        Error::StageToolFailure { stage, .. } => assert_eq!(stage, Stage::Merge),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!fx.output().exists());
    assert!(!fx.temp.path().join("tape_denoised.part.mkv").exists());
    assert!(fx.scratch_is_empty());
}

#[tokio::test]
async fn cancellation_stops_running_workers() {
    let fx = Fixture::new();
    let cancel = CancellationToken::new();
    let pipeline = ChannelSplitPipeline::new(
        Arc::new(ShCommands {
            frames: vec![0; 2],
            hang: true,
            ..ShCommands::default()
        }),
        SampleWindow {
            start: 0.0,
            length: 1.0,
        },
        fx.scratch_root(),
        cancel.clone(),
    );

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(10), pipeline.run(layout(2), &fx.output()))
        .await
        .expect("cancellation must stop the pipeline")
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(!fx.output().exists());
}

#[tokio::test]
async fn empty_noise_profile_is_rejected() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline(ShCommands {
        frames: vec![10, 10],
        empty_profiles: true,
        ..ShCommands::default()
    });

    match pipeline.run(layout(2), &fx.output()).await.unwrap_err() {
        Error::WorkerFailure { channel, stage, .. } => {
            assert_eq!(channel, 0);
            assert_eq!(stage, Stage::ProfileBuild);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!fx.output().exists());
}

#[tokio::test]
async fn mono_input_filters_without_interleaving() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline(ShCommands {
        frames: vec![500],
        ..ShCommands::default()
    });

    let report = pipeline.run(layout(1), &fx.output()).await.unwrap();
    assert!(report.mono);

    let bytes = std::fs::read(fx.output()).unwrap();
    assert_eq!(bytes.len(), 500 * SAMPLE_BYTES);
    assert!(bytes.iter().all(|b| *b == 1));
    assert!(fx.scratch_is_empty());
}

#[tokio::test]
async fn zero_channels_is_invalid() {
    let fx = Fixture::new();
    let err = fx
        .pipeline(ShCommands::default())
        .run(layout(0), &fx.output())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}
