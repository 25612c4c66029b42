//! Trait definitions for the ACME client.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{ArtifactPaths, ToolError, ToolOutput};

/// A client able to drive DNS-01 issuance for a set of names.
///
/// `Err` is reserved for invocations that could not complete (missing
/// binary, timeout, I/O). A process that ran and exited non-zero comes
/// back as `Ok` so callers can still inspect its output.
#[async_trait]
pub trait AcmeClient: Send + Sync {
    /// Returns the name of this client implementation.
    fn name(&self) -> &str;

    /// Starts a manual-mode DNS order and prints the TXT records to publish.
    async fn issue_manual_dns(&self, names: &[String]) -> Result<ToolOutput, ToolError>;

    /// Completes DNS issuance once the records are published.
    async fn issue(&self, names: &[String], force: bool) -> Result<ToolOutput, ToolError>;

    /// Renews an existing manual-mode order.
    async fn renew(&self, names: &[String]) -> Result<ToolOutput, ToolError>;

    /// Copies the issued certificate for `domain` to `target`.
    async fn install_cert(
        &self,
        domain: &str,
        target: &ArtifactPaths,
    ) -> Result<ToolOutput, ToolError>;

    /// Drops `domain` from the client's renewal list.
    async fn remove(&self, domain: &str) -> Result<ToolOutput, ToolError>;

    /// Directory the client keeps its own copy of `domain`'s certificate in.
    fn store_dir(&self, domain: &str) -> PathBuf;
}
