//! Child-process supervision for the external stage tools.
//!
//! Every tool invocation goes through [`SupervisedChild`]: stderr is drained
//! line by line into the debug log and a bounded tail, and waiting is always
//! raced against a [`CancellationToken`] so that a stalled tool can be killed.

use std::process::Stdio;
use std::time::Instant;

use process_utils::{OutputTail, describe_exit, program_label};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Pipeline stage a tool invocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
pub enum Stage {
    #[strum(serialize = "probe")]
    Probe,
    #[strum(serialize = "frame extraction")]
    FrameExtract,
    #[strum(serialize = "upscaling")]
    Upscale,
    #[strum(serialize = "sequence encoding")]
    Encode,
    #[strum(serialize = "concatenation")]
    Concat,
    #[strum(serialize = "muxing")]
    Mux,
    #[strum(serialize = "noise sample extraction")]
    ProfileExtract,
    #[strum(serialize = "noise profiling")]
    ProfileBuild,
    #[strum(serialize = "channel extraction")]
    ChannelExtract,
    #[strum(serialize = "channel filtering")]
    ChannelFilter,
    #[strum(serialize = "channel merge")]
    Merge,
    #[strum(serialize = "tempo correction")]
    Tempo,
}

/// A spawned tool whose exit is supervised.
pub struct SupervisedChild {
    stage: Stage,
    tool: String,
    child: Child,
    stderr: Option<JoinHandle<OutputTail>>,
}

impl SupervisedChild {
    /// Spawn `cmd` with stderr captured.
    ///
    /// Stdin/stdout are left as configured by the caller. The command is
    /// consumed so that any pipe ends it still holds are closed in this
    /// process once the child is running.
    pub fn spawn(stage: Stage, mut cmd: Command) -> Result<Self> {
        let tool = program_label(&cmd);
        cmd.stderr(Stdio::piped());
        debug!(%stage, tool = %tool, args = ?cmd.as_std().get_args().collect::<Vec<_>>(), "Spawning tool");

        let mut child = cmd.spawn().map_err(|e| Error::StageToolFailure {
            stage,
            tool: tool.clone(),
            status: format!("could not be started ({e})"),
            stderr_tail: String::new(),
        })?;
        drop(cmd);

        let stderr = child.stderr.take().map(|stderr| {
            let tool = tool.clone();
            tokio::spawn(async move {
                let mut tail = OutputTail::default();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(%stage, tool = %tool, "stderr: {}", line);
                    tail.push(line);
                }
                tail
            })
        });

        Ok(Self {
            stage,
            tool,
            child,
            stderr,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn take_stdout(&mut self) -> Result<ChildStdout> {
        self.child
            .stdout
            .take()
            .ok_or_else(|| Error::Other(format!("{} stdout was not captured", self.tool)))
    }

    pub fn take_stdin(&mut self) -> Result<ChildStdin> {
        self.child
            .stdin
            .take()
            .ok_or_else(|| Error::Other(format!("{} stdin was not captured", self.tool)))
    }

    /// Wait for the child to exit, killing it if `cancel` fires first.
    ///
    /// A non-zero exit becomes [`Error::StageToolFailure`] carrying the tail
    /// of the tool's stderr.
    pub async fn wait(mut self, cancel: &CancellationToken) -> Result<()> {
        let started = Instant::now();
        let status = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(stage = %self.stage, tool = %self.tool, "Cancellation requested, killing tool");
                let _ = self.child.kill().await;
                return Err(Error::Cancelled);
            }
            status = self.child.wait() => status,
        };

        let status = status.map_err(|e| Error::StageToolFailure {
            stage: self.stage,
            tool: self.tool.clone(),
            status: format!("could not be waited on ({e})"),
            stderr_tail: String::new(),
        })?;

        let tail = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => OutputTail::default(),
        };

        if status.success() {
            debug!(
                stage = %self.stage,
                tool = %self.tool,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Tool finished"
            );
            return Ok(());
        }

        let status = describe_exit(&status);
        warn!(stage = %self.stage, tool = %self.tool, %status, "Tool failed");
        Err(Error::StageToolFailure {
            stage: self.stage,
            tool: self.tool,
            status,
            stderr_tail: tail.joined(),
        })
    }
}

/// Run a one-shot tool to completion and return its stdout.
pub async fn run_tool(stage: Stage, mut cmd: Command, cancel: &CancellationToken) -> Result<Vec<u8>> {
    cmd.stdout(Stdio::piped());
    let mut child = SupervisedChild::spawn(stage, cmd)?;
    let mut stdout = child.take_stdout()?;

    let reader = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf).await;
        buf
    });

    child.wait(cancel).await?;
    Ok(reader.await.unwrap_or_default())
}
