//! Error types for patchship-edit.
//!
//! Variants split into two groups:
//! - Patch blocks (exit code 2): the target is missing or a required rule matched nothing
//! - Runtime errors (exit code 1): invalid patterns, I/O failures

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    /// The file a rule targets does not exist.
    #[error("file not found: {path}")]
    FileNotFound { path: Utf8PathBuf },

    /// A `required` rule found no occurrence. The file is left untouched.
    #[error("patch not applied: rule #{rule_index} matched nothing in {path}")]
    PatchNotApplied { path: Utf8PathBuf, rule_index: usize },

    /// The matcher could not be compiled (bad regex, empty literal).
    #[error("invalid pattern in rule #{rule_index}: {message}")]
    InvalidPattern { rule_index: usize, message: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PatchError {
    /// Returns true when the rule set is valid but cannot be applied to this tree.
    pub fn is_patch_block(&self) -> bool {
        matches!(
            self,
            PatchError::FileNotFound { .. } | PatchError::PatchNotApplied { .. }
        )
    }

    /// Returns the recommended exit code for this error.
    pub fn exit_code(&self) -> u8 {
        if self.is_patch_block() { 2 } else { 1 }
    }

    pub(crate) fn io(path: &camino::Utf8Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            PatchError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            PatchError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Result type alias using PatchError.
pub type EditResult<T> = Result<T, PatchError>;
