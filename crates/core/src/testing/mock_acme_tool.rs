//! Mock ACME client for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::acme::{AcmeClient, ArtifactPaths, ToolError, ToolOutput};

/// Subcommand a recorded call used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolCommand {
    IssueManualDns,
    Issue,
    Renew,
    InstallCert,
    Remove,
}

/// A recorded tool invocation for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub command: ToolCommand,
    /// Names passed with `-d` (a single entry for install/remove).
    pub names: Vec<String>,
    pub force: bool,
}

/// Scripted result for one subcommand.
#[derive(Debug, Clone)]
struct ScriptedExit {
    exit_code: i32,
    output: String,
}

/// Mock implementation of the AcmeClient trait.
///
/// Behaves like a well-mannered acme.sh:
/// - manual DNS issue prints one `Domain:`/`TXT value:` pair per name
/// - a successful issue writes the four artifacts into the private store
/// - install-cert copies the store files to the requested paths
///
/// Every call is recorded; failures and delays are configurable.
///
/// # Example
///
/// ```rust,ignore
/// use certdesk_core::testing::{MockAcmeTool, ToolCommand};
///
/// let store = tempfile::tempdir()?;
/// let tool = MockAcmeTool::new(store.path());
/// tool.fail_command(ToolCommand::Issue, 1, "rate limited").await;
///
/// // ... drive the engine ...
///
/// assert_eq!(tool.call_count(ToolCommand::Issue).await, 1);
/// ```
#[derive(Debug)]
pub struct MockAcmeTool {
    store_root: PathBuf,
    calls: Arc<RwLock<Vec<RecordedCall>>>,
    /// Persistent non-zero exits per subcommand.
    failures: Arc<RwLock<HashMap<ToolCommand, ScriptedExit>>>,
    /// If set, the next invocation fails with this error.
    next_error: Arc<RwLock<Option<ToolError>>>,
    /// Replaces the generated manual DNS output.
    challenge_output: Arc<RwLock<Option<String>>>,
    delay: Arc<RwLock<Duration>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockAcmeTool {
    /// Create a mock whose private store lives under `store_root`.
    pub fn new(store_root: impl AsRef<Path>) -> Self {
        Self {
            store_root: store_root.as_ref().to_path_buf(),
            calls: Arc::new(RwLock::new(Vec::new())),
            failures: Arc::new(RwLock::new(HashMap::new())),
            next_error: Arc::new(RwLock::new(None)),
            challenge_output: Arc::new(RwLock::new(None)),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// TXT value the mock prints for `name`.
    pub fn token_for(name: &str) -> String {
        format!("token-{}", name.replace('*', "wild"))
    }

    /// Get all recorded calls.
    pub async fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    /// Number of calls made with `command`.
    pub async fn call_count(&self, command: ToolCommand) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.command == command)
            .count()
    }

    /// Highest number of invocations that were running at once.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Make every `command` invocation exit with `exit_code` and print `output`.
    pub async fn fail_command(&self, command: ToolCommand, exit_code: i32, output: &str) {
        self.failures.write().await.insert(
            command,
            ScriptedExit {
                exit_code,
                output: output.to_string(),
            },
        );
    }

    /// Undo `fail_command`.
    pub async fn clear_failure(&self, command: ToolCommand) {
        self.failures.write().await.remove(&command);
    }

    /// Configure the next invocation to fail with the given error.
    pub async fn set_next_error(&self, error: ToolError) {
        *self.next_error.write().await = Some(error);
    }

    /// Replace the manual DNS output (e.g. with something unparseable).
    pub async fn set_challenge_output(&self, output: impl Into<String>) {
        *self.challenge_output.write().await = Some(output.into());
    }

    /// Make every invocation take at least `delay`.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// Write the artifacts the tool would keep for `domain`.
    pub async fn seed_store(&self, domain: &str) -> std::io::Result<()> {
        let dir = self.store_dir(domain);
        tokio::fs::create_dir_all(&dir).await?;
        let paths = ArtifactPaths::in_store(&dir, domain);
        for (name, path) in paths.entries() {
            let body = format!(
                "-----BEGIN MOCK-----\n{} for {}\n-----END MOCK-----\n",
                name, domain
            );
            tokio::fs::write(path, body).await?;
        }
        Ok(())
    }

    fn ok(stdout: String) -> ToolOutput {
        ToolOutput {
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
            duration: Duration::from_millis(1),
        }
    }

    fn manual_dns_output(names: &[String]) -> String {
        let mut out = String::from("[mock] Using CA: letsencrypt\n");
        for name in names {
            let apex = name.trim_start_matches("*.");
            out.push_str("[mock] Add the following TXT record:\n");
            out.push_str(&format!("[mock] Domain: '_acme-challenge.{}'\n", apex));
            out.push_str(&format!("[mock] TXT value: '{}'\n", Self::token_for(name)));
        }
        out.push_str("[mock] Please add the TXT records to the domains, and re-run with --renew.\n");
        out
    }

    /// Shared prologue: record, simulate latency, apply scripted failures.
    async fn begin(
        &self,
        command: ToolCommand,
        names: &[String],
        force: bool,
    ) -> Result<Option<ToolOutput>, ToolError> {
        self.calls.write().await.push(RecordedCall {
            command,
            names: names.to_vec(),
            force,
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }
        if let Some(exit) = self.failures.read().await.get(&command) {
            return Ok(Some(ToolOutput {
                exit_code: Some(exit.exit_code),
                stdout: String::new(),
                stderr: exit.output.clone(),
                duration: delay,
            }));
        }
        Ok(None)
    }

    fn io_failure(e: std::io::Error) -> ToolOutput {
        ToolOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: e.to_string(),
            duration: Duration::from_millis(1),
        }
    }
}

#[async_trait]
impl AcmeClient for MockAcmeTool {
    fn name(&self) -> &str {
        "mock"
    }

    async fn issue_manual_dns(&self, names: &[String]) -> Result<ToolOutput, ToolError> {
        if let Some(failed) = self.begin(ToolCommand::IssueManualDns, names, false).await? {
            return Ok(failed);
        }
        let output = match self.challenge_output.read().await.clone() {
            Some(custom) => custom,
            None => Self::manual_dns_output(names),
        };
        Ok(Self::ok(output))
    }

    async fn issue(&self, names: &[String], force: bool) -> Result<ToolOutput, ToolError> {
        if let Some(failed) = self.begin(ToolCommand::Issue, names, force).await? {
            return Ok(failed);
        }
        let Some(domain) = names.first() else {
            return Ok(Self::io_failure(std::io::Error::other("no domain given")));
        };
        match self.seed_store(domain).await {
            Ok(()) => Ok(Self::ok(format!("[mock] Cert success for {}\n", domain))),
            Err(e) => Ok(Self::io_failure(e)),
        }
    }

    async fn renew(&self, names: &[String]) -> Result<ToolOutput, ToolError> {
        if let Some(failed) = self.begin(ToolCommand::Renew, names, false).await? {
            return Ok(failed);
        }
        let Some(domain) = names.first() else {
            return Ok(Self::io_failure(std::io::Error::other("no domain given")));
        };
        match self.seed_store(domain).await {
            Ok(()) => Ok(Self::ok(format!("[mock] Renew success for {}\n", domain))),
            Err(e) => Ok(Self::io_failure(e)),
        }
    }

    async fn install_cert(
        &self,
        domain: &str,
        target: &ArtifactPaths,
    ) -> Result<ToolOutput, ToolError> {
        let names = [domain.to_string()];
        if let Some(failed) = self.begin(ToolCommand::InstallCert, &names, false).await? {
            return Ok(failed);
        }
        let store = ArtifactPaths::in_store(&self.store_dir(domain), domain);
        for ((_, from), (_, to)) in store.entries().into_iter().zip(target.entries()) {
            if let Err(e) = tokio::fs::copy(from, to).await {
                return Ok(Self::io_failure(e));
            }
        }
        Ok(Self::ok(format!("[mock] Installed {}\n", domain)))
    }

    async fn remove(&self, domain: &str) -> Result<ToolOutput, ToolError> {
        let names = [domain.to_string()];
        if let Some(failed) = self.begin(ToolCommand::Remove, &names, false).await? {
            return Ok(failed);
        }
        Ok(Self::ok(format!("[mock] {} is removed\n", domain)))
    }

    fn store_dir(&self, domain: &str) -> PathBuf {
        self.store_root.join(format!("{}_ecc", domain))
    }
}
