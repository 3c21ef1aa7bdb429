//! Parallel per-channel audio processing.

pub mod commands;
pub mod pipe;
pub mod pipeline;
pub mod profile;
pub mod supervisor;

pub use commands::{ChannelCommands, FfmpegSoxCommands};
pub use pipe::{ChannelPipe, interleave};
pub use pipeline::{AudioLayout, ChannelSplitPipeline, PipelineReport};
pub use profile::{NoiseProfile, build_profiles};
pub use supervisor::TaskGroup;
