//! External tool discovery.
//!
//! Each sub-command declares which tools it needs; all of them are version
//! probed before any work starts so that a missing binary fails fast with
//! [`Error::MissingDependency`] instead of halfway through a segment.

use std::process::Stdio;

use tracing::{debug, info};

use crate::config::ToolPaths;
use crate::{Error, Result};

/// External programs the orchestrator drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Tool {
    Ffmpeg,
    Ffprobe,
    Sox,
    #[strum(serialize = "realesrgan-ncnn-vulkan")]
    Realesrgan,
}

impl Tool {
    fn version_args(self) -> &'static [&'static str] {
        match self {
            Tool::Ffmpeg | Tool::Ffprobe => &["-version"],
            Tool::Sox => &["--version"],
            // Prints usage and exits non-zero, which still proves it can start.
            Tool::Realesrgan => &["-h"],
        }
    }

    /// Configured binary for this tool.
    pub fn binary(self, paths: &ToolPaths) -> &str {
        match self {
            Tool::Ffmpeg => &paths.ffmpeg,
            Tool::Ffprobe => &paths.ffprobe,
            Tool::Sox => &paths.sox,
            Tool::Realesrgan => &paths.realesrgan,
        }
    }
}

/// A tool that was found, with the first line of its version banner.
#[derive(Debug, Clone)]
pub struct ResolvedTool {
    pub tool: Tool,
    pub binary: String,
    pub version: Option<String>,
}

/// Start `binary` once with its version flag.
///
/// Returns `Ok(None)` when the program runs but prints nothing useful, and
/// `Err` only when it cannot be started at all.
pub async fn detect_version(tool: Tool, binary: &str) -> Result<Option<String>> {
    let mut cmd = process_utils::tokio_command(binary);
    cmd.args(tool.version_args())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = cmd.output().await.map_err(|e| {
        debug!(%tool, binary, error = %e, "Tool could not be started");
        Error::MissingDependency {
            tool: tool.into(),
            binary: binary.to_string(),
        }
    })?;

    let first_line = |bytes: &[u8]| {
        String::from_utf8_lossy(bytes)
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
    };
    Ok(first_line(&output.stdout).or_else(|| first_line(&output.stderr)))
}

/// Verify that every tool in `required` can be started.
pub async fn ensure_available(paths: &ToolPaths, required: &[Tool]) -> Result<Vec<ResolvedTool>> {
    let mut resolved = Vec::with_capacity(required.len());
    for &tool in required {
        let binary = tool.binary(paths);
        let version = detect_version(tool, binary).await?;
        info!(
            %tool,
            binary,
            version = version.as_deref().unwrap_or("unknown"),
            "Found tool"
        );
        resolved.push(ResolvedTool {
            tool,
            binary: binary.to_string(),
            version,
        });
    }
    Ok(resolved)
}
