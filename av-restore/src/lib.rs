//! av-restore library crate.
//!
//! Resumable, segment-based audio/video restoration driven by external tools
//! (ffmpeg, sox, a Real-ESRGAN upscaler).

pub mod channels;
pub mod config;
pub mod drift;
pub mod error;
pub mod job;
pub mod logging;
pub mod probe;
pub mod process;
pub mod segment;
pub mod toolchain;
pub mod utils;
pub mod workflow;

pub use error::{Error, Result};
