use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub acme: AcmeConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub dns: DnsConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("certdesk.db")
}

/// External ACME client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AcmeConfig {
    /// Path to the ACME client executable.
    #[serde(default = "default_tool_path")]
    pub tool_path: PathBuf,
    /// Arguments placed before every subcommand, for running the
    /// client through a wrapper (`sudo -u acme /opt/acme.sh`).
    #[serde(default)]
    pub tool_args: Vec<String>,
    /// CA server identifier passed as `--server`.
    #[serde(default = "default_acme_server")]
    pub server: String,
    /// Hard ceiling for a single tool invocation.
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
    /// Root of the tool's private certificate store.
    /// `None` resolves to `$HOME/.acme.sh`.
    #[serde(default)]
    pub home_dir: Option<PathBuf>,
    /// Suffix the tool appends to per-domain store directories.
    #[serde(default = "default_key_suffix")]
    pub key_suffix: String,
}

impl AcmeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Directory the tool keeps its own copy of a domain's certificate in.
    pub fn store_dir(&self, domain: &str) -> PathBuf {
        let home = self.home_dir.clone().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".acme.sh")
        });
        home.join(format!("{}{}", domain, self.key_suffix))
    }
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            tool_path: default_tool_path(),
            tool_args: Vec::new(),
            server: default_acme_server(),
            timeout_secs: default_tool_timeout(),
            home_dir: None,
            key_suffix: default_key_suffix(),
        }
    }
}

fn default_tool_path() -> PathBuf {
    PathBuf::from("/root/.acme.sh/acme.sh")
}

fn default_acme_server() -> String {
    "letsencrypt".to_string()
}

fn default_tool_timeout() -> u64 {
    180
}

fn default_key_suffix() -> String {
    "_ecc".to_string()
}

/// Where exported certificates land and how they are reached from outside
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_root")]
    pub root: PathBuf,
    #[serde(default = "default_download_base_url")]
    pub download_base_url: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            root: default_export_root(),
            download_base_url: default_download_base_url(),
        }
    }
}

fn default_export_root() -> PathBuf {
    PathBuf::from("public/ssl")
}

fn default_download_base_url() -> String {
    "https://cert.example.com/ssl".to_string()
}

/// Order lifecycle policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LifecycleConfig {
    /// Lock window taken before any tool interaction.
    /// Must cover one full tool invocation.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Residual lock kept after an operation finishes.
    #[serde(default = "default_settle")]
    pub settle_secs: u64,
    /// Consecutive tool failures after which an order is no longer retried.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Orders per page when listing.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl LifecycleConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown(),
            settle_secs: default_settle(),
            retry_limit: default_retry_limit(),
            page_size: default_page_size(),
        }
    }
}

fn default_cooldown() -> u64 {
    240
}

fn default_settle() -> u64 {
    15
}

fn default_retry_limit() -> u32 {
    3
}

fn default_page_size() -> u32 {
    5
}

/// Batch sweep configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweepConfig {
    /// Orders processed in parallel within one stage.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Delay between sweeps in watch mode.
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
    /// Maximum orders picked up per stage and run.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            interval_secs: default_sweep_interval(),
            batch_limit: default_batch_limit(),
        }
    }
}

fn default_max_concurrency() -> usize {
    2
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_batch_limit() -> i64 {
    200
}

/// TXT lookup configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DnsConfig {
    /// Nameservers to query (empty = resolver default).
    #[serde(default)]
    pub nameservers: Vec<IpAddr>,
    #[serde(default = "default_dns_timeout")]
    pub timeout_secs: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            nameservers: Vec::new(),
            timeout_secs: default_dns_timeout(),
        }
    }
}

fn default_dns_timeout() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.acme.server, "letsencrypt");
        assert_eq!(config.acme.timeout_secs, 180);
        assert_eq!(config.lifecycle.retry_limit, 3);
        assert!(config.lifecycle.cooldown_secs >= config.acme.timeout_secs);
        assert_eq!(config.sweep.max_concurrency, 2);
        assert!(config.dns.nameservers.is_empty());
    }

    #[test]
    fn test_store_dir_uses_suffix() {
        let acme = AcmeConfig {
            home_dir: Some(PathBuf::from("/srv/acme")),
            ..Default::default()
        };
        assert_eq!(
            acme.store_dir("example.com"),
            PathBuf::from("/srv/acme/example.com_ecc")
        );
    }

    #[test]
    fn test_deserialize_partial_section() {
        let toml = r#"
            [lifecycle]
            retry_limit = 5
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.lifecycle.retry_limit, 5);
        assert_eq!(config.lifecycle.page_size, 5);
        assert_eq!(config.acme.timeout_secs, 180);
    }
}
