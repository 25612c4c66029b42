//! Error types for challenge handling.

use std::path::PathBuf;
use thiserror::Error;

use crate::acme::ToolError;
use crate::dns::DnsError;

/// Which tool interaction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStage {
    Challenge,
    Issue,
    Install,
    Renew,
    Remove,
}

impl ToolStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStage::Challenge => "challenge",
            ToolStage::Issue => "issue",
            ToolStage::Install => "install",
            ToolStage::Renew => "renew",
            ToolStage::Remove => "remove",
        }
    }
}

impl std::fmt::Display for ToolStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ChallengeError {
    /// Tool output did not contain a host/value pair.
    #[error("No DNS challenge found in ACME client output")]
    ChallengeParse { output: String },

    #[error("ACME client {stage} step failed: {source}")]
    ToolInvocation {
        stage: ToolStage,
        #[source]
        source: ToolError,
    },

    #[error("Certificate artifact missing: {path}")]
    ArtifactMissing { path: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Dns(#[from] DnsError),
}

impl ChallengeError {
    pub(crate) fn tool(stage: ToolStage, source: ToolError) -> Self {
        Self::ToolInvocation { stage, source }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Step the failure belongs to, for logs and the audit trail.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::ChallengeParse { .. } => ToolStage::Challenge.as_str(),
            Self::ToolInvocation { stage, .. } => stage.as_str(),
            Self::ArtifactMissing { .. } | Self::Io { .. } => ToolStage::Install.as_str(),
            Self::Dns(_) => "dns",
        }
    }

    /// Failure after the certificate was issued; re-installing may fix it
    /// without another issuance.
    pub fn is_install_failure(&self) -> bool {
        matches!(
            self,
            Self::ArtifactMissing { .. }
                | Self::Io { .. }
                | Self::ToolInvocation {
                    stage: ToolStage::Install,
                    ..
                }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_failures() {
        let missing = ChallengeError::ArtifactMissing {
            path: PathBuf::from("/x/ca.cer"),
        };
        assert!(missing.is_install_failure());

        let issue = ChallengeError::tool(ToolStage::Issue, ToolError::Timeout { timeout_secs: 1 });
        assert!(!issue.is_install_failure());
        assert_eq!(
            issue.to_string(),
            "ACME client issue step failed: ACME client timed out after 1 seconds"
        );

        let install = ChallengeError::tool(
            ToolStage::Install,
            ToolError::NonZeroExit {
                code: Some(1),
                output: String::new(),
            },
        );
        assert!(install.is_install_failure());
    }
}
