//! Small process-related helpers shared across the workspace.
//!
//! Every external tool the orchestrator drives is started through
//! [`tokio_command`] (or [`std_command`] for one-shot version probes), so that
//! child processes never pop up a console window on Windows and are always
//! killed when their handle is dropped.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::process::ExitStatus;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Number of trailing output lines kept by default for diagnostics.
pub const DEFAULT_TAIL_LINES: usize = 12;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` for a supervised child.
///
/// The command has `CREATE_NO_WINDOW` applied on Windows, `kill_on_drop`
/// enabled and stdin closed. Callers that stream into the child override
/// stdin explicitly.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.kill_on_drop(true);
    cmd.stdin(std::process::Stdio::null());
    cmd
}

/// Short label for a command's program, used in log fields and errors.
#[cfg(feature = "tokio")]
pub fn program_label(cmd: &tokio::process::Command) -> String {
    let program = cmd.as_std().get_program();
    std::path::Path::new(program)
        .file_name()
        .unwrap_or(program)
        .to_string_lossy()
        .into_owned()
}

/// Describe how a process ended: `exit code N`, `signal N` or `unknown status`.
pub fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {signal}");
        }
    }

    "unknown status".to_string()
}

/// Bounded buffer that keeps the last `capacity` lines pushed into it.
///
/// Tools like ffmpeg and sox write their diagnostics to stderr; only the tail
/// is interesting once they fail.
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        if line.trim().is_empty() {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Join the retained lines with newlines, oldest first.
    pub fn joined(&self) -> String {
        self.lines
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for OutputTail {
    fn default() -> Self {
        Self::new(DEFAULT_TAIL_LINES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_only_last_lines() {
        let mut tail = OutputTail::new(2);
        tail.push("one");
        tail.push("two");
        tail.push("three");
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.joined(), "two\nthree");
    }

    #[test]
    fn tail_skips_blank_lines() {
        let mut tail = OutputTail::new(4);
        tail.push("   ");
        tail.push("");
        assert!(tail.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn describe_exit_reports_code() {
        let status = std_command("sh").args(["-c", "exit 3"]).status().unwrap();
        assert_eq!(describe_exit(&status), "exit code 3");
    }

    #[cfg(feature = "tokio")]
    #[test]
    fn program_label_strips_directories() {
        let cmd = tokio_command("/usr/local/bin/ffmpeg");
        assert_eq!(program_label(&cmd), "ffmpeg");
    }
}
