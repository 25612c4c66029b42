use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::info;

use certdesk_core::audit::{create_audit_system, AuditEvent, AuditHandle, AuditStore, SqliteAuditStore};
use certdesk_core::{
    Account, AccountStore, AcmeClient, AcmeShTool, BatchSweeper, ChallengeCoordinator, Config,
    HickoryTxtResolver, LifecycleEngine, OrderStore, SqliteAccountStore, SqliteOrderStore,
    TxtResolver,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

/// Everything a command needs, wired from one configuration.
pub struct AppState {
    config: Config,
    engine: Arc<LifecycleEngine>,
    audit_store: Arc<dyn AuditStore>,
    audit: AuditHandle,
    writer: JoinHandle<u64>,
}

impl AppState {
    pub async fn build(config: Config) -> Result<Self> {
        let db_path = &config.database.path;
        info!(path = %db_path.display(), "Opening database");

        let audit_store: Arc<dyn AuditStore> = Arc::new(
            SqliteAuditStore::new(db_path).context("Failed to create audit store")?,
        );
        let orders: Arc<dyn OrderStore> = Arc::new(
            SqliteOrderStore::new(db_path).context("Failed to create order store")?,
        );
        let accounts: Arc<dyn AccountStore> = Arc::new(
            SqliteAccountStore::new(db_path).context("Failed to create account store")?,
        );

        let (audit, writer) = create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
        let writer = tokio::spawn(writer.run());

        let client: Arc<dyn AcmeClient> = Arc::new(AcmeShTool::new(config.acme.clone()));
        let resolver: Arc<dyn TxtResolver> = Arc::new(HickoryTxtResolver::new(&config.dns));
        let coordinator = Arc::new(ChallengeCoordinator::new(
            client,
            resolver,
            config.export.root.clone(),
        ));

        let engine = Arc::new(LifecycleEngine::new(
            orders,
            accounts,
            coordinator,
            config.lifecycle.clone(),
            config.export.download_base_url.clone(),
            Some(audit.clone()),
        ));

        audit
            .emit(AuditEvent::ServiceStarted {
                version: VERSION.to_string(),
                config_hash: config_hash(&config),
            })
            .await;

        Ok(Self {
            config,
            engine,
            audit_store,
            audit,
            writer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &LifecycleEngine {
        &self.engine
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    pub fn sweeper(&self) -> BatchSweeper {
        BatchSweeper::new(
            Arc::clone(&self.engine),
            self.config.sweep.clone(),
            Some(self.audit.clone()),
        )
    }

    /// Look up an account by its chat-side identifier.
    pub fn account(&self, external_id: &str) -> Result<Account> {
        self.engine
            .accounts()
            .get_by_external_id(external_id)?
            .with_context(|| format!("No account registered as '{}'", external_id))
    }

    /// Emit `ServiceStopped` and wait until every audit event is written.
    pub async fn shutdown(self, reason: &str) {
        self.audit
            .emit(AuditEvent::ServiceStopped {
                reason: reason.to_string(),
            })
            .await;

        // The writer stops once every handle is gone; the engine holds one.
        let Self {
            engine,
            audit,
            writer,
            ..
        } = self;
        drop(engine);
        drop(audit);

        match writer.await {
            Ok(written) => info!(written, "Audit writer stopped"),
            Err(e) => tracing::warn!(error = %e, "Audit writer task failed"),
        }
    }
}

/// Short SHA-256 of the effective configuration, for the audit trail.
fn config_hash(config: &Config) -> String {
    let json = serde_json::to_string(config).unwrap_or_default();
    let hash = format!("{:x}", Sha256::digest(json.as_bytes()));
    hash[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_hash_is_stable() {
        let config = Config::default();
        assert_eq!(config_hash(&config), config_hash(&config.clone()));
        assert_eq!(config_hash(&config).len(), 16);

        let mut other = Config::default();
        other.lifecycle.retry_limit = 9;
        assert_ne!(config_hash(&config), config_hash(&other));
    }
}
