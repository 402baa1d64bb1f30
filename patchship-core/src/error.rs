//! Step and pipeline error types.

use crate::ports::ProcessOutput;
use camino::Utf8PathBuf;
use patchship_edit::PatchError;
use patchship_types::outcome::StepStatus;

/// Why a single deploy step failed.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// A path to patch or stage does not exist.
    #[error("file not found: {path}")]
    FileNotFound { path: Utf8PathBuf },

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("git command failed: {command}\n{stderr}")]
    GitCommand { command: String, stderr: String },

    #[error("deploy command failed: {command}\n{stderr}")]
    DeployCommand { command: String, stderr: String },

    #[error("command timed out: {command}")]
    Timeout { command: String },

    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl StepError {
    pub(crate) fn git(command: String, output: &ProcessOutput) -> Self {
        if output.timed_out {
            StepError::Timeout { command }
        } else {
            StepError::GitCommand {
                command,
                stderr: output.diagnostic(),
            }
        }
    }

    pub(crate) fn deploy(command: String, output: &ProcessOutput) -> Self {
        if output.timed_out {
            StepError::Timeout { command }
        } else {
            StepError::DeployCommand {
                command,
                stderr: output.diagnostic(),
            }
        }
    }
}

/// A step that did not fail: succeeded, warned or was deliberately skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepNote {
    pub status: StepStatus,
    pub message: Option<String>,
}

impl StepNote {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Succeeded,
            message: Some(message.into()),
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Warned,
            message: Some(message.into()),
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            message: Some(message.into()),
        }
    }
}

pub type StepResult = Result<StepNote, StepError>;

/// Error type for pipeline results. A fatal step failure is not an error here:
/// it is recorded in the outcome (`RunOutcome::exit_code` → 2).
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("another run is already in progress")]
    Busy,
    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl ToolError {
    pub fn exit_code(&self) -> u8 {
        1
    }
}
