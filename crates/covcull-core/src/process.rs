//! External process execution with captured output and a bounded timeout.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::error::{CovcullError, Result};

/// One external command to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Short label for logs ("compile", "gcov", ...).
    pub label: String,

    pub program: String,

    pub args: Vec<String>,

    /// Working directory; inherits the caller's when `None`.
    pub cwd: Option<PathBuf>,

    /// Timeout in seconds; 0 disables the timeout.
    pub timeout_secs: u64,
}

impl ProcessSpec {
    pub fn new(label: impl Into<String>, program: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout_secs,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Command line as a single string, for diagnostics.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a process execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub label: String,

    /// Exit code (-1 when killed or timed out).
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    pub duration_ms: u64,

    /// Whether the process was killed at its timeout.
    pub timed_out: bool,

    /// Whether the process exited with status 0.
    pub success: bool,
}

impl ProcessOutcome {
    /// Whether this run passed (exit code 0, no timeout).
    pub fn passed(&self) -> bool {
        self.success && !self.timed_out && self.exit_code == 0
    }

    /// Diagnostic text: stderr, else stdout, else a note about the exit.
    pub fn diagnostics(&self) -> String {
        if self.timed_out {
            return format!("{} timed out after {}ms", self.label, self.duration_ms);
        }
        if !self.stderr.trim().is_empty() {
            self.stderr.clone()
        } else if !self.stdout.trim().is_empty() {
            self.stdout.clone()
        } else {
            format!("{} exited with code {}", self.label, self.exit_code)
        }
    }

    /// First `max_lines` lines of [`ProcessOutcome::diagnostics`].
    pub fn diagnostic_excerpt(&self, max_lines: usize) -> String {
        excerpt(&self.diagnostics(), max_lines)
    }
}

/// First `max_lines` lines of `text`, with a marker when truncated.
pub fn excerpt(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        return text.trim_end().to_string();
    }
    format!(
        "{}\n... ({} more lines)",
        lines[..max_lines].join("\n"),
        lines.len() - max_lines
    )
}

/// Run a process to completion, enforcing its timeout.
///
/// A timeout is reported as a failed outcome, not as an error; only a
/// failure to spawn the process is an `Err`.
pub async fn run_process(spec: &ProcessSpec) -> Result<ProcessOutcome> {
    let start = Instant::now();

    if spec.program.is_empty() {
        return Err(CovcullError::Process(format!(
            "{} has an empty program",
            spec.label
        )));
    }

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.cwd {
        command.current_dir(dir);
    }

    let child = command.spawn().map_err(|e| {
        CovcullError::Process(format!("failed to spawn `{}`: {e}", spec.command_line()))
    })?;

    let waited = if spec.timeout_secs > 0 {
        tokio::time::timeout(
            Duration::from_secs(spec.timeout_secs),
            child.wait_with_output(),
        )
        .await
    } else {
        Ok(child.wait_with_output().await)
    };

    let duration_ms = start.elapsed().as_millis() as u64;

    let output = match waited {
        Ok(result) => result.map_err(|e| {
            CovcullError::Process(format!("failed to wait for `{}`: {e}", spec.command_line()))
        })?,
        Err(_) => {
            // The child is killed when its future is dropped.
            return Ok(ProcessOutcome {
                label: spec.label.clone(),
                exit_code: -1,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms,
                timed_out: true,
                success: false,
            });
        }
    };

    Ok(ProcessOutcome {
        label: spec.label.clone(),
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms,
        timed_out: false,
        success: output.status.success(),
    })
}
