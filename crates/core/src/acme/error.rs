//! Error types for external tool invocations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while running the ACME client.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Executable not found.
    #[error("ACME client not found at path: {path}")]
    NotFound { path: PathBuf },

    /// Process ran but reported failure.
    #[error("ACME client exited with code {code:?}: {output}")]
    NonZeroExit { code: Option<i32>, output: String },

    /// Process exceeded its time budget and was killed.
    #[error("ACME client timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// I/O error while spawning or waiting.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Whether running the same command again could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotFound { .. })
    }

    /// Exit code as the shell would report it (124 for a timeout).
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NonZeroExit { code, .. } => *code,
            Self::Timeout { .. } => Some(124),
            _ => None,
        }
    }
}
