//! Drives challenge generation, propagation checks and certificate export
//! for a single order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::export::{self, ArtifactSet};
use super::{parse_challenge_output, ChallengeError, ToolStage};
use crate::acme::{AcmeClient, ArtifactPaths, ToolError, ToolOutput};
use crate::dns::TxtResolver;
use crate::order::{CertType, DnsChallenge};

/// Returns true if every expected value is present among `records`.
///
/// Matching tolerates surrounding quotes and resolvers that return the
/// value embedded in a longer string.
pub fn values_present(expected: &[String], records: &[String]) -> bool {
    if expected.is_empty() {
        return false;
    }
    expected.iter().all(|value| {
        let wanted = value.trim_matches('"');
        records.iter().any(|record| {
            let found = record.trim_matches('"');
            record == value || found == wanted || found.contains(wanted)
        })
    })
}

/// Coordinates the ACME client and the TXT resolver.
///
/// Holds no order state; every call works only on its arguments.
pub struct ChallengeCoordinator {
    client: Arc<dyn AcmeClient>,
    resolver: Arc<dyn TxtResolver>,
    export_root: PathBuf,
}

impl ChallengeCoordinator {
    pub fn new(
        client: Arc<dyn AcmeClient>,
        resolver: Arc<dyn TxtResolver>,
        export_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            resolver,
            export_root: export_root.into(),
        }
    }

    /// Where artifacts for `domain` are exported.
    pub fn export_dir(&self, domain: &str) -> PathBuf {
        export::export_dir(&self.export_root, domain)
    }

    /// Asks the client for the TXT records that prove control of `domain`.
    pub async fn generate_challenge(
        &self,
        domain: &str,
        cert_type: CertType,
    ) -> Result<DnsChallenge, ChallengeError> {
        let names = cert_type.requested_names(domain);
        let output = self
            .client
            .issue_manual_dns(&names)
            .await
            .map_err(|e| ChallengeError::tool(ToolStage::Challenge, e))?;

        // Manual mode may exit non-zero after printing the records; the
        // records are what matter.
        let combined = output.combined();
        match parse_challenge_output(&combined) {
            Some(challenge) => {
                tracing::info!(
                    domain,
                    host = %challenge.host,
                    values = challenge.values.len(),
                    "Generated DNS challenge"
                );
                Ok(challenge)
            }
            None if !output.success() => Err(ChallengeError::tool(
                ToolStage::Challenge,
                ToolError::NonZeroExit {
                    code: output.exit_code,
                    output: combined,
                },
            )),
            None => Err(ChallengeError::ChallengeParse { output: combined }),
        }
    }

    /// Looks up `host` and checks that every value is visible.
    ///
    /// `Ok(false)` means "not yet"; only resolver failures are errors.
    pub async fn verify_propagation(
        &self,
        host: &str,
        values: &[String],
    ) -> Result<bool, ChallengeError> {
        if host.is_empty() || values.is_empty() {
            return Ok(false);
        }
        let records = self.resolver.lookup_txt(host).await?;
        let present = values_present(values, &records);
        tracing::debug!(host, found = records.len(), present, "Checked TXT propagation");
        Ok(present)
    }

    /// Completes issuance for `domain` and exports the four artifacts.
    pub async fn issue_and_install(
        &self,
        domain: &str,
        cert_type: CertType,
    ) -> Result<ArtifactSet, ChallengeError> {
        let names = cert_type.requested_names(domain);
        let output = self
            .client
            .issue(&names, true)
            .await
            .map_err(|e| ChallengeError::tool(ToolStage::Issue, e))?;

        if !output.success() {
            // The client refuses to issue again while a valid certificate
            // is on disk; that certificate is what we want to export.
            if self.store_has_certificate(domain).await {
                tracing::info!(
                    domain,
                    exit_code = ?output.exit_code,
                    "Issue declined, exporting existing certificate"
                );
            } else {
                return Err(ChallengeError::tool(
                    ToolStage::Issue,
                    ToolError::NonZeroExit {
                        code: output.exit_code,
                        output: output.combined(),
                    },
                ));
            }
        }

        self.install_artifacts(domain).await
    }

    /// Renews the certificate held by the client and exports it again.
    pub async fn renew_and_install(
        &self,
        domain: &str,
        cert_type: CertType,
    ) -> Result<ArtifactSet, ChallengeError> {
        let names = cert_type.requested_names(domain);
        self.client
            .renew(&names)
            .await
            .and_then(ToolOutput::into_result)
            .map_err(|e| ChallengeError::tool(ToolStage::Renew, e))?;

        tracing::info!(domain, "Renewed certificate");
        self.install_artifacts(domain).await
    }

    /// Exports the already-issued certificate for `domain`.
    ///
    /// Artifacts are staged in a fresh directory and renamed over the
    /// export, so a failed install never leaves a half-written set.
    pub async fn install_artifacts(&self, domain: &str) -> Result<ArtifactSet, ChallengeError> {
        let staging = export::create_staging(&self.export_root, domain).await?;

        if let Err(e) = self.stage_artifacts(domain, &staging).await {
            export::discard_staging(&staging).await;
            return Err(e);
        }

        let target = self.export_dir(domain);
        export::promote(&staging, &target).await?;
        let set = export::describe(domain, &target).await?;
        tracing::info!(domain, dir = %target.display(), "Exported certificate");
        Ok(set)
    }

    /// Fingerprints of the currently exported artifacts.
    pub async fn describe_artifacts(&self, domain: &str) -> Result<ArtifactSet, ChallengeError> {
        export::describe(domain, &self.export_dir(domain)).await
    }

    /// Drops `domain` from the client's renewal list.
    pub async fn remove(&self, domain: &str) -> Result<ToolOutput, ChallengeError> {
        self.client
            .remove(domain)
            .await
            .and_then(ToolOutput::into_result)
            .map_err(|e| ChallengeError::tool(ToolStage::Remove, e))
    }

    async fn store_has_certificate(&self, domain: &str) -> bool {
        let store = ArtifactPaths::in_store(&self.client.store_dir(domain), domain);
        export::ensure_complete(&store).await.is_ok()
    }

    async fn stage_artifacts(&self, domain: &str, staging: &Path) -> Result<(), ChallengeError> {
        let staged = ArtifactPaths::in_dir(staging);

        let installed = match self
            .client
            .install_cert(domain, &staged)
            .await
            .and_then(ToolOutput::into_result)
        {
            Ok(_) => export::ensure_complete(&staged).await,
            Err(e) => Err(ChallengeError::tool(ToolStage::Install, e)),
        };

        if let Err(e) = installed {
            tracing::warn!(
                domain,
                error = %e,
                "install-cert did not produce the artifacts, copying from client store"
            );
            let store = ArtifactPaths::in_store(&self.client.store_dir(domain), domain);
            export::copy_artifacts(&store, &staged).await?;
            export::ensure_complete(&staged).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockAcmeTool, MockTxtResolver, ToolCommand};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        tool: Arc<MockAcmeTool>,
        resolver: Arc<MockTxtResolver>,
        coordinator: ChallengeCoordinator,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let tool = Arc::new(MockAcmeTool::new(temp.path().join("store")));
        let resolver = Arc::new(MockTxtResolver::new());
        let coordinator = ChallengeCoordinator::new(
            tool.clone(),
            resolver.clone(),
            temp.path().join("export"),
        );
        Fixture {
            _temp: temp,
            tool,
            resolver,
            coordinator,
        }
    }

    #[test]
    fn test_values_present_tolerates_quotes() {
        let expected = vec!["abc".to_string(), "def".to_string()];
        assert!(values_present(
            &expected,
            &["\"abc\"".to_string(), "xx def xx".to_string()]
        ));
        assert!(!values_present(&expected, &["abc".to_string()]));
        assert!(!values_present(&[], &["abc".to_string()]));
    }

    #[tokio::test]
    async fn test_generate_wildcard_challenge() {
        let f = fixture();
        let challenge = f
            .coordinator
            .generate_challenge("example.com", CertType::Wildcard)
            .await
            .unwrap();

        assert_eq!(challenge.host, "_acme-challenge.example.com");
        assert_eq!(challenge.values.len(), 2);

        let calls = f.tool.recorded_calls().await;
        assert_eq!(calls[0].names, vec!["example.com", "*.example.com"]);
    }

    #[tokio::test]
    async fn test_generate_reports_tool_failure() {
        let f = fixture();
        f.tool
            .fail_command(ToolCommand::IssueManualDns, 1, "Invalid domain")
            .await;

        let err = f
            .coordinator
            .generate_challenge("example.com", CertType::Single)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChallengeError::ToolInvocation {
                stage: ToolStage::Challenge,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_generate_reports_unparseable_output() {
        let f = fixture();
        f.tool.set_challenge_output("nothing useful here").await;

        let err = f
            .coordinator
            .generate_challenge("example.com", CertType::Single)
            .await
            .unwrap_err();
        assert!(matches!(err, ChallengeError::ChallengeParse { .. }));
    }

    #[tokio::test]
    async fn test_verify_propagation() {
        let f = fixture();
        let host = "_acme-challenge.example.com";
        let values = vec!["v1".to_string()];

        assert!(!f.coordinator.verify_propagation(host, &values).await.unwrap());
        f.resolver.publish(host, &values).await;
        assert!(f.coordinator.verify_propagation(host, &values).await.unwrap());
        assert!(!f.coordinator.verify_propagation("", &values).await.unwrap());
    }

    #[tokio::test]
    async fn test_issue_and_install_exports_four_files() {
        let f = fixture();
        let set = f
            .coordinator
            .issue_and_install("example.com", CertType::Wildcard)
            .await
            .unwrap();

        assert_eq!(set.files.len(), 4);
        for file in &set.files {
            assert!(file.path.exists(), "{} missing", file.name);
        }
        assert_eq!(set.dir, f.coordinator.export_dir("example.com"));
    }

    #[tokio::test]
    async fn test_issue_failure_without_existing_cert() {
        let f = fixture();
        f.tool.fail_command(ToolCommand::Issue, 1, "Verify error").await;

        let err = f
            .coordinator
            .issue_and_install("example.com", CertType::Single)
            .await
            .unwrap_err();
        assert!(!err.is_install_failure());
        assert!(!f.coordinator.export_dir("example.com").exists());
    }

    #[tokio::test]
    async fn test_issue_declined_exports_existing_cert() {
        let f = fixture();
        f.tool.seed_store("example.com").await.unwrap();
        f.tool.fail_command(ToolCommand::Issue, 2, "Skip, Next renewal time").await;

        let set = f
            .coordinator
            .issue_and_install("example.com", CertType::Single)
            .await
            .unwrap();
        assert_eq!(set.files.len(), 4);
    }

    #[tokio::test]
    async fn test_install_falls_back_to_store_copy() {
        let f = fixture();
        f.tool.seed_store("example.com").await.unwrap();
        f.tool.fail_command(ToolCommand::InstallCert, 1, "boom").await;

        let set = f.coordinator.install_artifacts("example.com").await.unwrap();
        assert_eq!(set.files.len(), 4);
    }

    #[tokio::test]
    async fn test_install_reports_missing_artifact() {
        let f = fixture();
        let err = f
            .coordinator
            .install_artifacts("example.com")
            .await
            .unwrap_err();

        assert!(matches!(err, ChallengeError::ArtifactMissing { .. }));
        assert!(err.is_install_failure());
    }

    #[tokio::test]
    async fn test_reinstall_is_byte_identical() {
        let f = fixture();
        f.tool.seed_store("example.com").await.unwrap();

        let first = f.coordinator.install_artifacts("example.com").await.unwrap();
        let second = f.coordinator.install_artifacts("example.com").await.unwrap();

        let hashes = |set: &ArtifactSet| -> Vec<String> {
            set.files.iter().map(|file| file.sha256.clone()).collect()
        };
        assert_eq!(hashes(&first), hashes(&second));
    }

    #[tokio::test]
    async fn test_remove_maps_failure() {
        let f = fixture();
        assert!(f.coordinator.remove("example.com").await.is_ok());

        f.tool.fail_command(ToolCommand::Remove, 1, "no such domain").await;
        let err = f.coordinator.remove("example.com").await.unwrap_err();
        assert!(matches!(
            err,
            ChallengeError::ToolInvocation {
                stage: ToolStage::Remove,
                ..
            }
        ));
    }
}
