//! Per-channel noise profiles.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::job::SampleWindow;
use crate::process::Stage;
use crate::utils::fs;
use crate::{Error, Result};

use super::commands::ChannelCommands;
use super::pipe::spawn_pair;
use super::supervisor::TaskGroup;

/// Noise fingerprint of one channel, read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseProfile {
    pub channel: usize,
    pub window: SampleWindow,
    pub path: PathBuf,
}

pub fn profile_path(scratch: &Path, channel: usize) -> PathBuf {
    scratch.join(format!("channel_{channel:02}.prof"))
}

/// Build one profile per channel, all channels concurrently.
///
/// Returns profiles ordered by channel index. Any failure cancels the
/// remaining builders.
pub async fn build_profiles(
    commands: Arc<dyn ChannelCommands>,
    channels: u32,
    window: SampleWindow,
    sample_rate: u32,
    scratch: &Path,
    cancel: &CancellationToken,
) -> Result<Vec<NoiseProfile>> {
    let mut group = TaskGroup::new(cancel);
    let mut profiles = Vec::with_capacity(channels as usize);

    for channel in 0..channels as usize {
        let path = profile_path(scratch, channel);
        let (extract, build) = spawn_pair(
            Stage::ProfileExtract,
            commands.profile_extract(channel, window, sample_rate),
            Stage::ProfileBuild,
            commands.profile_build(&path, sample_rate),
        )?;
        group.spawn_child(extract, Some(channel));
        group.spawn_child(build, Some(channel));
        profiles.push(NoiseProfile {
            channel,
            window,
            path,
        });
    }

    group.join().await?;

    for profile in &profiles {
        match fs::file_len(&profile.path).await? {
            Some(len) if len > 0 => {
                debug!(channel = profile.channel, path = %profile.path.display(), "Noise profile ready")
            }
            _ => {
                return Err(Error::WorkerFailure {
                    channel: profile.channel,
                    stage: Stage::ProfileBuild,
                    source: Box::new(Error::Other("no noise profile was written".to_string())),
                });
            }
        }
    }

    info!(
        channels,
        start = window.start,
        length = window.length,
        "Noise profiles built"
    );
    Ok(profiles)
}
