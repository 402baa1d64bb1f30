//! Port traits abstracting subprocess, HTTP and artifact I/O away from the pipeline.

use camino::Utf8Path;
use std::time::Duration;

/// Captured result of one subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` when killed by a signal or the timeout.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn timeout() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }

    /// stderr, or stdout when stderr is empty; trimmed.
    pub fn diagnostic(&self) -> String {
        let err = self.stderr.trim();
        if err.is_empty() {
            self.stdout.trim().to_string()
        } else {
            err.to_string()
        }
    }
}

/// Runs external commands to completion.
///
/// `Err` means the command could not be started at all; a non-zero exit is
/// reported through [`ProcessOutput`].
pub trait ProcessRunner {
    fn run(&self, cwd: &Utf8Path, program: &str, args: &[String]) -> anyhow::Result<ProcessOutput>;
}

/// Result of a single health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Healthy { status: u16, body: String },
    Unhealthy { status: u16, body: String },
    TimedOut,
    Unreachable { message: String },
}

/// Issues one HTTP GET against a health endpoint.
pub trait HealthProbe {
    fn probe(&self, url: &str, timeout: Duration) -> ProbeResult;
}

/// File-system write operations.
pub trait WritePort {
    fn write_file(&self, path: &Utf8Path, contents: &[u8]) -> anyhow::Result<()>;
    fn create_dir_all(&self, path: &Utf8Path) -> anyhow::Result<()>;
}
