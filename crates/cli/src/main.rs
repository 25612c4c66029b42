mod args;
mod render;
mod state;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use certdesk_core::audit::AuditFilter;
use certdesk_core::{
    load_config, load_config_from_env, validate_config, Config, OrderAction, Outcome,
};

use args::{AccountCommand, Cli, Command, OrderArgs, OrderCommand};
use state::AppState;

/// Looked up when no `--config` is given.
const DEFAULT_CONFIG_FILE: &str = "certdesk.toml";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.json);

    if let Err(e) = run(cli).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output stays clean on stdout.
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn read_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => load_config(Path::new(DEFAULT_CONFIG_FILE))
            .with_context(|| format!("Failed to load config from {}", DEFAULT_CONFIG_FILE))?,
        None => load_config_from_env().context("Failed to load config from environment")?,
    };
    validate_config(&config).context("Configuration validation failed")?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = read_config(cli.config.as_deref())?;
    info!(
        tool = %config.acme.tool_path.display(),
        server = %config.acme.server,
        export_root = %config.export.root.display(),
        "Configuration loaded"
    );

    let state = AppState::build(config).await?;
    let output = Output { json: cli.json };

    let result = match cli.command {
        None | Some(Command::Sweep) => sweep(&state, output).await,
        Some(Command::Watch) => watch(&state).await,
        Some(Command::Account(cmd)) => account(&state, cmd, output).await,
        Some(Command::Order(args)) => order(&state, args, output).await,
        Some(Command::Action { account, token }) => action(&state, &account, &token, output).await,
        Some(Command::Audit {
            order,
            account,
            event_type,
            limit,
        }) => audit(&state, order, account.as_deref(), event_type, limit, output),
    };

    state.shutdown("command finished").await;
    result
}

#[derive(Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    fn print<T: Serialize>(&self, value: &T, text: impl FnOnce(&T) -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text(value));
        }
        Ok(())
    }
}

/// One sweep; per-order failures are recorded on the orders, not the exit status.
async fn sweep(state: &AppState, output: Output) -> Result<()> {
    let report = state.sweeper().run_once().await.context("Sweep failed")?;
    output.print(&report, render::sweep)
}

async fn watch(state: &AppState) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let sweeper = state.sweeper();

    tokio::select! {
        _ = sweeper.run_until(shutdown_rx) => {}
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(());
        }
    }
    Ok(())
}

async fn account(state: &AppState, cmd: AccountCommand, output: Output) -> Result<()> {
    let engine = state.engine();
    let account = match cmd {
        AccountCommand::Register {
            external_id,
            username,
        } => {
            engine
                .register_account(&external_id, username.as_deref())
                .await?
        }
        AccountCommand::Show { external_id } => state.account(&external_id)?,
        AccountCommand::Find { username } => engine
            .accounts()
            .find_by_username(&username)?
            .with_context(|| format!("No account with username '{}'", username))?,
        AccountCommand::Grant {
            external_id,
            amount,
        } => {
            let id = state.account(&external_id)?.id;
            engine.grant_quota(id, amount).await?
        }
        AccountCommand::Ban { external_id } => {
            let id = state.account(&external_id)?.id;
            engine.accounts().set_banned(id, true)?
        }
        AccountCommand::Unban { external_id } => {
            let id = state.account(&external_id)?.id;
            engine.accounts().set_banned(id, false)?
        }
        AccountCommand::SetRole { external_id, role } => {
            let id = state.account(&external_id)?.id;
            engine.accounts().set_role(id, role)?
        }
    };
    output.print(&account, render::account)
}

async fn order(state: &AppState, args: OrderArgs, output: Output) -> Result<()> {
    let engine = state.engine();
    let account = state.account(&args.account)?.id;

    let outcome = match args.command {
        OrderCommand::New { cert_type } => {
            let order = engine.create_order(account).await?;
            match cert_type {
                Some(cert_type) => engine.set_type(account, order.id, cert_type).await?,
                None => Outcome::Updated { order },
            }
        }
        OrderCommand::Type { id, cert_type } => engine.set_type(account, id, cert_type).await?,
        OrderCommand::Domain { id, domain } => engine.submit_domain(account, id, &domain).await?,
        OrderCommand::Text { text } => engine.submit_text(account, &text).await?,
        OrderCommand::Verify { id: Some(id), .. } => engine.verify(account, id).await?,
        OrderCommand::Verify {
            id: None,
            domain: Some(domain),
        } => engine.verify_by_domain(account, &domain).await?,
        OrderCommand::Verify { .. } => anyhow::bail!("verify needs an order id or --domain"),
        OrderCommand::Retry { id } => engine.retry_challenge(account, id).await?,
        OrderCommand::Status { domain } => engine.status(account, &domain).await?,
        OrderCommand::Cancel { id } => engine.cancel(account, id).await?,
        OrderCommand::Reinstall { id } => engine.reinstall(account, id).await?,
        OrderCommand::Renew { id } => engine.renew(account, id).await?,
        OrderCommand::Download { id } => {
            let links = engine.download_info(account, id)?;
            return output.print(&links, |l| render::downloads(l));
        }
        OrderCommand::Info { id } => {
            let set = engine.certificate_info(account, id).await?;
            return output.print(&set, render::artifact_set);
        }
        OrderCommand::List { page } => {
            let page = engine.list_orders(account, page)?;
            return output.print(&page, render::page);
        }
        OrderCommand::RecordError { id, message } => {
            engine.record_error(account, id, &message).await?;
            return Ok(());
        }
    };
    output.print(&outcome, render::outcome)
}

async fn action(state: &AppState, account: &str, token: &str, output: Output) -> Result<()> {
    let action: OrderAction = token
        .parse()
        .with_context(|| format!("Invalid action token '{}'", token))?;
    let account = state.account(account)?.id;
    let response = state.engine().dispatch(account, action).await?;
    output.print(&response, render::response)
}

fn audit(
    state: &AppState,
    order: Option<i64>,
    account: Option<&str>,
    event_type: Option<String>,
    limit: i64,
    output: Output,
) -> Result<()> {
    let mut filter = AuditFilter::new().with_limit(limit);
    if let Some(order) = order {
        filter = filter.with_order(order);
    }
    if let Some(external_id) = account {
        filter = filter.with_account(state.account(external_id)?.id);
    }
    if let Some(event_type) = event_type {
        filter = filter.with_event_type(event_type);
    }

    let records = state.audit_store().query(&filter)?;
    output.print(&records, |r| render::audit(r))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
