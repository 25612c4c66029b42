//! acme.sh-based client implementation.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use super::{AcmeClient, ArtifactPaths, ToolError, ToolOutput};
use crate::config::AcmeConfig;

const MANUAL_DNS_FLAG: &str = "--yes-I-know-dns-manual-mode-enough-go-ahead-please";

/// Runs acme.sh in manual DNS mode.
pub struct AcmeShTool {
    config: AcmeConfig,
}

impl AcmeShTool {
    pub fn new(config: AcmeConfig) -> Self {
        Self { config }
    }

    /// Arguments for the issue family of subcommands.
    fn dns_args(&self, subcommand: &str, names: &[String], force: bool) -> Vec<String> {
        let mut args = vec![
            subcommand.to_string(),
            "--dns".to_string(),
            "--server".to_string(),
            self.config.server.clone(),
        ];
        if force {
            args.push("--force".to_string());
        }
        args.push(MANUAL_DNS_FLAG.to_string());
        for name in names {
            args.extend(["-d".to_string(), name.clone()]);
        }
        args
    }

    fn install_args(domain: &str, target: &ArtifactPaths) -> Vec<String> {
        vec![
            "--install-cert".to_string(),
            "-d".to_string(),
            domain.to_string(),
            "--key-file".to_string(),
            target.key.to_string_lossy().to_string(),
            "--fullchain-file".to_string(),
            target.fullchain.to_string_lossy().to_string(),
            "--cert-file".to_string(),
            target.cert.to_string_lossy().to_string(),
            "--ca-file".to_string(),
            target.ca.to_string_lossy().to_string(),
        ]
    }

    /// Full argv after the executable: wrapper args, subcommand, then `--home`.
    fn argv(&self, mut args: Vec<String>) -> Vec<String> {
        if let Some(ref home) = self.config.home_dir {
            args.extend(["--home".to_string(), home.to_string_lossy().to_string()]);
        }
        let mut argv = self.config.tool_args.clone();
        argv.extend(args);
        argv
    }

    async fn run(&self, args: Vec<String>) -> Result<ToolOutput, ToolError> {
        let argv = self.argv(args);
        let started = Instant::now();
        tracing::debug!(
            tool = %self.config.tool_path.display(),
            args = ?argv,
            "Running ACME client"
        );

        let child = Command::new(&self.config.tool_path)
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ToolError::NotFound {
                        path: self.config.tool_path.clone(),
                    }
                } else {
                    ToolError::Io(e)
                }
            })?;

        // Dropping the wait future on timeout kills the child.
        let output = match timeout(self.config.timeout(), child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ToolError::Io(e)),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.config.timeout_secs,
                    subcommand = argv.get(self.config.tool_args.len()).map(String::as_str),
                    "ACME client timed out"
                );
                return Err(ToolError::Timeout {
                    timeout_secs: self.config.timeout_secs,
                });
            }
        };

        let result = ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: started.elapsed(),
        };

        tracing::info!(
            exit_code = ?result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "ACME client finished"
        );
        if !result.success() {
            tracing::warn!(
                exit_code = ?result.exit_code,
                stderr = %result.stderr.trim(),
                "ACME client reported failure"
            );
        }

        Ok(result)
    }
}

#[async_trait]
impl AcmeClient for AcmeShTool {
    fn name(&self) -> &str {
        "acme.sh"
    }

    async fn issue_manual_dns(&self, names: &[String]) -> Result<ToolOutput, ToolError> {
        self.run(self.dns_args("--issue", names, false)).await
    }

    async fn issue(&self, names: &[String], force: bool) -> Result<ToolOutput, ToolError> {
        self.run(self.dns_args("--issue", names, force)).await
    }

    async fn renew(&self, names: &[String]) -> Result<ToolOutput, ToolError> {
        self.run(self.dns_args("--renew", names, false)).await
    }

    async fn install_cert(
        &self,
        domain: &str,
        target: &ArtifactPaths,
    ) -> Result<ToolOutput, ToolError> {
        self.run(Self::install_args(domain, target)).await
    }

    async fn remove(&self, domain: &str) -> Result<ToolOutput, ToolError> {
        self.run(vec![
            "--remove".to_string(),
            "-d".to_string(),
            domain.to_string(),
        ])
        .await
    }

    fn store_dir(&self, domain: &str) -> PathBuf {
        self.config.store_dir(domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn names() -> Vec<String> {
        vec!["example.com".to_string(), "*.example.com".to_string()]
    }

    /// Runs `sh -c <script>` in place of the client; the real argv lands in `$@`.
    fn shell_tool(script: &str, timeout_secs: u64) -> AcmeShTool {
        AcmeShTool::new(AcmeConfig {
            tool_path: PathBuf::from("/bin/sh"),
            tool_args: vec!["-c".to_string(), script.to_string(), "acme.sh".to_string()],
            timeout_secs,
            ..Default::default()
        })
    }

    #[test]
    fn test_manual_issue_args() {
        let tool = AcmeShTool::new(AcmeConfig::default());
        let args = tool.dns_args("--issue", &names(), false);
        assert_eq!(
            args,
            vec![
                "--issue",
                "--dns",
                "--server",
                "letsencrypt",
                MANUAL_DNS_FLAG,
                "-d",
                "example.com",
                "-d",
                "*.example.com",
            ]
        );
    }

    #[test]
    fn test_forced_issue_args() {
        let tool = AcmeShTool::new(AcmeConfig::default());
        let args = tool.dns_args("--issue", &names()[..1], true);
        assert!(args.contains(&"--force".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("example.com"));
    }

    #[test]
    fn test_install_args() {
        let target = ArtifactPaths::in_dir(Path::new("/export/example.com"));
        let args = AcmeShTool::install_args("example.com", &target);
        assert_eq!(args[0], "--install-cert");
        assert_eq!(args[2], "example.com");
        let key_pos = args.iter().position(|a| a == "--key-file").unwrap();
        assert_eq!(args[key_pos + 1], "/export/example.com/key.key");
    }

    #[test]
    fn test_home_and_wrapper_args() {
        let tool = AcmeShTool::new(AcmeConfig {
            tool_args: vec!["-u".to_string(), "acme".to_string()],
            home_dir: Some(PathBuf::from("/srv/acme")),
            ..Default::default()
        });
        let argv = tool.argv(vec!["--remove".to_string()]);
        assert_eq!(argv, vec!["-u", "acme", "--remove", "--home", "/srv/acme"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_output() {
        let tool = shell_tool(r#"echo "args: $*"; echo oops >&2; exit 0"#, 10);
        let output = tool.remove("example.com").await.unwrap();

        assert!(output.success());
        assert_eq!(output.stdout.trim(), "args: --remove -d example.com");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_non_zero_is_ok_output() {
        let tool = shell_tool("echo failed; exit 3", 10);
        let output = tool.issue(&names(), true).await.unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert!(matches!(
            output.into_result(),
            Err(ToolError::NonZeroExit { code: Some(3), .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_times_out() {
        let tool = shell_tool("sleep 5", 1);
        let started = Instant::now();
        let result = tool.issue_manual_dns(&names()).await;

        assert!(matches!(result, Err(ToolError::Timeout { timeout_secs: 1 })));
        assert!(started.elapsed() < std::time::Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let tool = AcmeShTool::new(AcmeConfig {
            tool_path: PathBuf::from("/definitely/not/here/acme.sh"),
            ..Default::default()
        });
        let result = tool.remove("example.com").await;
        assert!(matches!(result, Err(ToolError::NotFound { .. })));
    }
}
