use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use certdesk_core::{CertType, Role};

/// DNS-01 certificate orders driven through an external ACME client.
///
/// Without a subcommand, runs one sweep and prints the stage counters.
#[derive(Debug, Parser)]
#[command(name = "certdesk", version, about)]
pub struct Cli {
    /// Configuration file (defaults and CERTDESK_* variables apply on top).
    #[arg(short, long, env = "CERTDESK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// JSON logs and JSON command output.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one sweep over all stages.
    Sweep,
    /// Sweep every `sweep.interval_secs` until interrupted.
    Watch,
    /// Account administration.
    #[command(subcommand)]
    Account(AccountCommand),
    /// Act on certificate orders as an account.
    Order(OrderArgs),
    /// Run a compact action token (`verify:12`, `type:wildcard:3`, `orders:2`).
    Action {
        /// Acting account's external id.
        #[arg(short, long)]
        account: String,
        token: String,
    },
    /// Show recent audit events.
    Audit {
        #[arg(long)]
        order: Option<i64>,
        /// Account external id.
        #[arg(long)]
        account: Option<String>,
        #[arg(long = "type")]
        event_type: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Debug, Subcommand)]
pub enum AccountCommand {
    /// Register an account (the first one becomes owner).
    Register {
        external_id: String,
        #[arg(long)]
        username: Option<String>,
    },
    Show { external_id: String },
    /// Look an account up by its username.
    Find { username: String },
    /// Add issuance quota.
    Grant { external_id: String, amount: u32 },
    Ban { external_id: String },
    Unban { external_id: String },
    SetRole {
        external_id: String,
        #[arg(value_parser = parse_role)]
        role: Role,
    },
}

#[derive(Debug, Args)]
pub struct OrderArgs {
    /// Acting account's external id.
    #[arg(short, long)]
    pub account: String,

    #[command(subcommand)]
    pub command: OrderCommand,
}

#[derive(Debug, Subcommand)]
pub enum OrderCommand {
    /// Open a new order (spends quota for regular users).
    New {
        /// Choose the type right away.
        #[arg(long = "type", value_parser = parse_cert_type)]
        cert_type: Option<CertType>,
    },
    /// Choose the certificate type.
    Type {
        id: i64,
        #[arg(value_parser = parse_cert_type)]
        cert_type: CertType,
    },
    /// Submit the domain and generate the challenge.
    Domain { id: i64, domain: String },
    /// Free-text input, routed by the account's pending prompt.
    Text { text: String },
    /// Check propagation, then issue and install.
    Verify {
        #[arg(required_unless_present = "domain")]
        id: Option<i64>,
        /// Verify the account's newest order for this domain instead.
        #[arg(long, conflicts_with = "id")]
        domain: Option<String>,
    },
    Retry { id: i64 },
    /// Status by domain.
    Status { domain: String },
    Cancel { id: i64 },
    Reinstall { id: i64 },
    /// Renew an issued certificate and export it again.
    Renew { id: i64 },
    Download { id: i64 },
    /// Exported file fingerprints.
    Info { id: i64 },
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Mark an order with an error raised outside the engine.
    RecordError {
        #[arg(long)]
        id: Option<i64>,
        message: String,
    },
}

fn parse_cert_type(s: &str) -> Result<CertType, String> {
    s.parse()
}

fn parse_role(s: &str) -> Result<Role, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_invocation_has_no_command() {
        let cli = Cli::try_parse_from(["certdesk"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.json);
    }

    #[test]
    fn test_order_subcommand() {
        let cli = Cli::try_parse_from([
            "certdesk", "order", "--account", "42", "type", "7", "wildcard",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Order(OrderArgs {
                account,
                command: OrderCommand::Type { id, cert_type },
            })) => {
                assert_eq!(account, "42");
                assert_eq!(id, 7);
                assert_eq!(cert_type, CertType::Wildcard);
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_cert_type_is_rejected() {
        let result =
            Cli::try_parse_from(["certdesk", "order", "-a", "1", "new", "--type", "ecdsa"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_verify_by_id_or_domain() {
        let cli = Cli::try_parse_from(["certdesk", "order", "-a", "1", "verify", "9"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Order(OrderArgs {
                command: OrderCommand::Verify {
                    id: Some(9),
                    domain: None
                },
                ..
            }))
        ));

        let cli = Cli::try_parse_from([
            "certdesk", "order", "-a", "1", "verify", "--domain", "Example.com",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Order(OrderArgs {
                command: OrderCommand::Verify { id: None, domain },
                ..
            })) => assert_eq!(domain.as_deref(), Some("Example.com")),
            other => panic!("unexpected parse: {:?}", other),
        }

        assert!(Cli::try_parse_from(["certdesk", "order", "-a", "1", "verify"]).is_err());
        assert!(Cli::try_parse_from([
            "certdesk", "order", "-a", "1", "verify", "9", "--domain", "example.com",
        ])
        .is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["certdesk", "sweep", "--json", "-c", "/etc/certdesk.toml"])
            .unwrap();
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/certdesk.toml")));
    }
}
