//! Channel-split noise reduction.
//!
//! Process tree for a C-channel input:
//!
//! ```text
//! extract[0] | filter[0] --\
//! extract[1] | filter[1] ---+--> interleaver --> merge (stdin) --> output.part
//!      ...                  |
//! extract[C-1] | filter[C-1]/
//! ```
//!
//! The merge process is started before any worker. Every process and the
//! interleaver run in one [`TaskGroup`], so a worker that dies early cancels
//! the whole tree instead of leaving the merge stage waiting forever. No
//! full-length intermediate audio is written.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::job::SampleWindow;
use crate::process::{Stage, SupervisedChild, run_tool};
use crate::utils::fs;
use crate::{Error, Result};

use super::commands::ChannelCommands;
use super::pipe::{ChannelPipe, interleave, spawn_pair};
use super::profile::{NoiseProfile, build_profiles};
use super::supervisor::TaskGroup;

/// Channel count and rate of the audio being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioLayout {
    pub channels: u32,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub output: PathBuf,
    pub channels: u32,
    /// Whether the single-channel path was taken.
    pub mono: bool,
}

pub struct ChannelSplitPipeline {
    commands: Arc<dyn ChannelCommands>,
    window: SampleWindow,
    scratch_root: PathBuf,
    cancel: CancellationToken,
}

impl ChannelSplitPipeline {
    /// `scratch_root` receives a private temporary directory per run.
    pub fn new(
        commands: Arc<dyn ChannelCommands>,
        window: SampleWindow,
        scratch_root: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            commands,
            window,
            scratch_root: scratch_root.into(),
            cancel,
        }
    }

    /// Denoise every channel of the source into `output`.
    ///
    /// `output` only appears once everything succeeded; scratch files are
    /// removed on every path.
    pub async fn run(&self, audio: AudioLayout, output: &Path) -> Result<PipelineReport> {
        if audio.channels == 0 {
            return Err(Error::validation("input has no audio channels"));
        }

        fs::ensure_dir_all(&self.scratch_root).await?;
        let scratch = tempfile::Builder::new()
            .prefix("denoise-")
            .tempdir_in(&self.scratch_root)
            .map_err(|e| Error::io_path("creating scratch directory in", &self.scratch_root, e))?;
        debug!(path = %scratch.path().display(), "Created scratch directory");

        fs::ensure_parent_dir(output).await?;
        let part = fs::part_path(output);
        fs::remove_file_if_exists(&part).await?;

        let result = self.run_in(audio, scratch.path(), &part).await;

        if let Err(e) = scratch.close() {
            warn!(error = %e, "Failed to remove scratch directory");
        }

        match result {
            Ok(()) => {
                fs::promote(&part, output).await?;
                info!(output = %output.display(), channels = audio.channels, "Denoised output written");
                Ok(PipelineReport {
                    output: output.to_path_buf(),
                    channels: audio.channels,
                    mono: audio.channels == 1,
                })
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file_if_exists(&part).await {
                    warn!(error = %cleanup, "Failed to remove partial output");
                }
                Err(e)
            }
        }
    }

    async fn run_in(&self, audio: AudioLayout, scratch: &Path, part: &Path) -> Result<()> {
        let profiles = build_profiles(
            self.commands.clone(),
            audio.channels,
            self.window,
            audio.sample_rate,
            scratch,
            &self.cancel,
        )
        .await?;

        if let [profile] = profiles.as_slice() {
            self.run_mono(profile, audio.sample_rate, scratch, part).await
        } else {
            self.run_split(&profiles, audio, scratch, part).await
        }
    }

    async fn sox_temp(scratch: &Path, channel: usize) -> Result<PathBuf> {
        let dir = scratch.join(format!("tmp_{channel:02}"));
        fs::ensure_dir_all(&dir).await?;
        Ok(dir)
    }

    async fn run_split(
        &self,
        profiles: &[NoiseProfile],
        audio: AudioLayout,
        scratch: &Path,
        part: &Path,
    ) -> Result<()> {
        let mut group = TaskGroup::new(&self.cancel);

        // Consumer first.
        let mut merge = self.commands.merge(audio.channels, audio.sample_rate, part);
        merge.stdin(Stdio::piped());
        let mut merge = SupervisedChild::spawn(Stage::Merge, merge)?;
        let merge_stdin = merge.take_stdin()?;
        group.spawn_child(merge, None);

        let mut pipes = Vec::with_capacity(profiles.len());
        for profile in profiles {
            let channel = profile.channel;
            let temp = Self::sox_temp(scratch, channel).await?;

            let mut filter =
                self.commands
                    .channel_filter(&profile.path, audio.sample_rate, &temp);
            filter.stdout(Stdio::piped());
            let (extract, mut filter) = spawn_pair(
                Stage::ChannelExtract,
                self.commands.channel_extract(channel, audio.sample_rate),
                Stage::ChannelFilter,
                filter,
            )?;

            pipes.push(ChannelPipe::new(channel, filter.take_stdout()?));
            group.spawn_child(extract, Some(channel));
            group.spawn_child(filter, Some(channel));
            debug!(channel, "Channel worker started");
        }

        let token = group.token();
        group.spawn(async move {
            let mut sink = merge_stdin;
            let frames = interleave(&mut pipes, &mut sink, &token).await?;
            debug!(frames, "Interleaver finished");
            Ok(())
        });

        info!(channels = audio.channels, "Channel workers running");
        group.join().await
    }

    async fn run_mono(
        &self,
        profile: &NoiseProfile,
        sample_rate: u32,
        scratch: &Path,
        part: &Path,
    ) -> Result<()> {
        let temp = Self::sox_temp(scratch, profile.channel).await?;
        let filtered = scratch.join("channel_00.wav");

        let mut group = TaskGroup::new(&self.cancel);
        let (extract, filter) = spawn_pair(
            Stage::ChannelExtract,
            self.commands.channel_extract(profile.channel, sample_rate),
            Stage::ChannelFilter,
            self.commands
                .filter_to_file(&profile.path, sample_rate, &temp, &filtered),
        )?;
        group.spawn_child(extract, Some(profile.channel));
        group.spawn_child(filter, Some(profile.channel));
        group.join().await?;

        run_tool(
            Stage::Mux,
            self.commands.mux_audio(&filtered, part),
            &self.cancel,
        )
        .await?;
        Ok(())
    }
}
