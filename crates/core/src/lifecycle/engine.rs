//! The certificate order state machine.
//!
//! Every operation re-reads the order, takes the cooldown lease before
//! touching the ACME client and writes the result back through the order
//! store, which rejects any status change outside the transition table.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::domain::normalize_domain;
use super::{ActionResponse, LifecycleError, OrderPage, Outcome};
use crate::account::{Account, AccountStore, PendingAction};
use crate::action::OrderAction;
use crate::audit::{AuditEvent, AuditHandle};
use crate::challenge::{download_links, ArtifactSet, ChallengeCoordinator, ChallengeError, DownloadLink};
use crate::config::LifecycleConfig;
use crate::cooldown::CooldownGuard;
use crate::order::{
    AccountId, CertOrder, CertType, OrderFilter, OrderId, OrderStatus, OrderStore, OrderUpdate,
};

/// Drives certificate orders through their lifecycle.
///
/// Interactive callers and the batch sweep share one engine, so they share
/// one state machine and one cooldown discipline.
pub struct LifecycleEngine {
    orders: Arc<dyn OrderStore>,
    accounts: Arc<dyn AccountStore>,
    coordinator: Arc<ChallengeCoordinator>,
    guard: CooldownGuard,
    config: LifecycleConfig,
    download_base_url: String,
    audit: Option<AuditHandle>,
}

impl LifecycleEngine {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        accounts: Arc<dyn AccountStore>,
        coordinator: Arc<ChallengeCoordinator>,
        config: LifecycleConfig,
        download_base_url: impl Into<String>,
        audit: Option<AuditHandle>,
    ) -> Self {
        let guard = CooldownGuard::new(orders.clone(), &config);
        Self {
            orders,
            accounts,
            coordinator,
            guard,
            config,
            download_base_url: download_base_url.into(),
            audit,
        }
    }

    pub fn orders(&self) -> &Arc<dyn OrderStore> {
        &self.orders
    }

    pub fn accounts(&self) -> &Arc<dyn AccountStore> {
        &self.accounts
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn guard(&self) -> &CooldownGuard {
        &self.guard
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }

    // ========================================================================
    // Accounts
    // ========================================================================

    /// Register an account (idempotent; refreshes the username).
    pub async fn register_account(
        &self,
        external_id: &str,
        username: Option<&str>,
    ) -> Result<Account, LifecycleError> {
        let existing = self.accounts.get_by_external_id(external_id)?;
        let account = self.accounts.register(external_id, username)?;

        if existing.is_none() {
            self.emit(AuditEvent::AccountRegistered {
                account_id: account.id,
                external_id: account.external_id.clone(),
                role: account.role.to_string(),
            })
            .await;
        }
        Ok(account)
    }

    pub async fn grant_quota(
        &self,
        account_id: AccountId,
        amount: u32,
    ) -> Result<Account, LifecycleError> {
        let account = self.accounts.grant_quota(account_id, amount)?;
        info!(account_id, amount, quota = account.quota, "Granted quota");
        self.emit(AuditEvent::QuotaGranted {
            account_id,
            amount,
            quota: account.quota,
        })
        .await;
        Ok(account)
    }

    fn active_account(&self, account_id: AccountId) -> Result<Account, LifecycleError> {
        let account = self
            .accounts
            .get(account_id)?
            .ok_or(LifecycleError::AccountNotFound(account_id))?;
        if account.banned {
            return Err(LifecycleError::Banned(account_id));
        }
        Ok(account)
    }

    fn load(&self, account_id: AccountId, order_id: OrderId) -> Result<CertOrder, LifecycleError> {
        self.orders
            .get(account_id, order_id)?
            .ok_or(LifecycleError::OrderNotFound(order_id))
    }

    fn load_by_domain(&self, account_id: AccountId, input: &str) -> Result<CertOrder, LifecycleError> {
        let domain = normalize_domain(input).map_err(|reason| LifecycleError::InvalidDomain {
            domain: input.trim().to_string(),
            reason,
        })?;
        self.orders
            .get_by_domain(account_id, &domain)?
            .ok_or(LifecycleError::DomainNotFound(domain))
    }

    // ========================================================================
    // Order creation and input collection
    // ========================================================================

    /// Open a new order, spending one unit of quota for unprivileged accounts.
    pub async fn create_order(&self, account_id: AccountId) -> Result<CertOrder, LifecycleError> {
        let account = self.active_account(account_id)?;
        let pays = account.pays_quota();

        if pays && !self.accounts.consume_quota(account_id)? {
            return Err(LifecycleError::QuotaExhausted(account_id));
        }

        let order = match self.orders.create(account_id) {
            Ok(order) => order,
            Err(e) => {
                if pays {
                    if let Err(refund) = self.accounts.refund_quota(account_id) {
                        error!(account_id, error = %refund, "Failed to refund quota");
                    }
                }
                return Err(e.into());
            }
        };

        let quota_left = if pays {
            self.accounts.get(account_id)?.map(|a| a.quota)
        } else {
            None
        };
        info!(order_id = order.id, account_id, ?quota_left, "Created order");
        self.emit(AuditEvent::OrderCreated {
            order_id: order.id,
            account_id,
            quota_left,
        })
        .await;

        Ok(order)
    }

    /// Choose the certificate type; the next free text is the domain.
    pub async fn set_type(
        &self,
        account_id: AccountId,
        order_id: OrderId,
        cert_type: CertType,
    ) -> Result<Outcome, LifecycleError> {
        self.active_account(account_id)?;
        let order = self.load(account_id, order_id)?;

        if order.status != OrderStatus::Created
            || order.domain.is_some()
            || order.cert_type.is_some_and(|t| t != cert_type)
        {
            return Err(LifecycleError::InvalidState {
                order_id,
                status: order.status,
                operation: "set the type of",
            });
        }

        let order = self
            .orders
            .update(order.id, &OrderUpdate::new().with_cert_type(cert_type))?;
        self.accounts
            .set_pending_action(account_id, PendingAction::AwaitDomain { order_id })?;
        debug!(order_id, %cert_type, "Certificate type chosen");

        Ok(Outcome::Updated { order })
    }

    /// Store the domain and generate the first challenge.
    pub async fn submit_domain(
        &self,
        account_id: AccountId,
        order_id: OrderId,
        input: &str,
    ) -> Result<Outcome, LifecycleError> {
        self.active_account(account_id)?;
        let domain = normalize_domain(input).map_err(|reason| LifecycleError::InvalidDomain {
            domain: input.trim().to_string(),
            reason,
        })?;
        let order = self.load(account_id, order_id)?;

        if order.cert_type.is_none() {
            return Err(LifecycleError::Validation(
                "choose a certificate type before submitting a domain".to_string(),
            ));
        }
        if !order.awaits_domain() {
            return Err(LifecycleError::InvalidState {
                order_id,
                status: order.status,
                operation: "submit a domain for",
            });
        }

        let order = self
            .orders
            .update(order.id, &OrderUpdate::new().with_domain(domain.as_str()))?;
        self.accounts.clear_pending_action(account_id)?;
        info!(order_id, domain = %domain, "Domain submitted");

        self.drive_challenge(&order).await
    }

    /// Route free text according to the account's pending prompt.
    ///
    /// Without a prompt the text is taken as the domain of the newest order
    /// still waiting for one.
    pub async fn submit_text(
        &self,
        account_id: AccountId,
        text: &str,
    ) -> Result<Outcome, LifecycleError> {
        let account = self.active_account(account_id)?;
        match account.pending_action {
            Some(PendingAction::AwaitDomain { order_id }) => {
                self.submit_domain(account_id, order_id, text).await
            }
            Some(PendingAction::AwaitStatusDomain) => self.status(account_id, text).await,
            None => {
                let order = self
                    .orders
                    .latest_awaiting_domain(account_id)?
                    .ok_or_else(|| {
                        LifecycleError::Validation("no order is waiting for a domain".to_string())
                    })?;
                self.submit_domain(account_id, order.id, text).await
            }
        }
    }

    /// Arm the prompt that takes a domain and reports its order status.
    pub fn await_status_domain(&self, account_id: AccountId) -> Result<(), LifecycleError> {
        self.active_account(account_id)?;
        self.accounts
            .set_pending_action(account_id, PendingAction::AwaitStatusDomain)?;
        Ok(())
    }

    // ========================================================================
    // Interactive operations
    // ========================================================================

    /// Replace the challenge of a waiting or failed order.
    pub async fn retry_challenge(
        &self,
        account_id: AccountId,
        order_id: OrderId,
    ) -> Result<Outcome, LifecycleError> {
        self.active_account(account_id)?;
        let order = self.load(account_id, order_id)?;

        let retryable = matches!(order.status, OrderStatus::DnsWait | OrderStatus::Failed);
        if !retryable || order.requested_names().is_empty() {
            return Err(LifecycleError::InvalidState {
                order_id,
                status: order.status,
                operation: "retry the challenge of",
            });
        }

        self.drive_challenge(&order).await
    }

    /// Check propagation and, once visible, issue and install.
    pub async fn verify(
        &self,
        account_id: AccountId,
        order_id: OrderId,
    ) -> Result<Outcome, LifecycleError> {
        self.active_account(account_id)?;
        let order = self.load(account_id, order_id)?;

        match order.status {
            OrderStatus::DnsWait | OrderStatus::DnsVerified => self.drive_verification(&order).await,
            OrderStatus::Issued => Ok(Outcome::Updated { order }),
            status => Err(LifecycleError::InvalidState {
                order_id,
                status,
                operation: "verify",
            }),
        }
    }

    pub async fn verify_by_domain(
        &self,
        account_id: AccountId,
        domain: &str,
    ) -> Result<Outcome, LifecycleError> {
        let order = self.load_by_domain(account_id, domain)?;
        self.verify(account_id, order.id).await
    }

    /// Current state of the account's newest order for `domain`.
    ///
    /// A `dns_verified` order is pushed through issue/install on the way.
    pub async fn status(&self, account_id: AccountId, domain: &str) -> Result<Outcome, LifecycleError> {
        let account = self
            .accounts
            .get(account_id)?
            .ok_or(LifecycleError::AccountNotFound(account_id))?;
        if account.pending_action == Some(PendingAction::AwaitStatusDomain) {
            self.accounts.clear_pending_action(account_id)?;
        }

        let order = self.load_by_domain(account_id, domain)?;
        self.refresh(order).await
    }

    pub async fn status_by_id(
        &self,
        account_id: AccountId,
        order_id: OrderId,
    ) -> Result<Outcome, LifecycleError> {
        let order = self.load(account_id, order_id)?;
        self.refresh(order).await
    }

    async fn refresh(&self, order: CertOrder) -> Result<Outcome, LifecycleError> {
        if order.status == OrderStatus::DnsVerified {
            return self.drive_verification(&order).await;
        }
        Ok(Outcome::Updated { order })
    }

    /// Cancel a non-terminal order and drop it from the client's renewals.
    pub async fn cancel(
        &self,
        account_id: AccountId,
        order_id: OrderId,
    ) -> Result<Outcome, LifecycleError> {
        let order = self.load(account_id, order_id)?;
        if !order.status.can_cancel() {
            return Err(LifecycleError::InvalidState {
                order_id,
                status: order.status,
                operation: "cancel",
            });
        }

        let previous = order.status;
        let order = self
            .transition(
                &order,
                &OrderUpdate::new().with_status(OrderStatus::Cancelled),
                Some("cancelled by owner"),
            )
            .await?;

        let pending = self
            .accounts
            .get(account_id)?
            .and_then(|a| a.pending_action)
            .and_then(|p| p.order_id());
        if pending == Some(order_id) {
            self.accounts.clear_pending_action(account_id)?;
        }

        if let Some(ref domain) = order.domain {
            if let Err(e) = self.coordinator.remove(domain).await {
                warn!(order_id, domain = %domain, error = %e, "Best-effort remove failed");
            }
        }

        self.emit(AuditEvent::OrderCancelled {
            order_id,
            account_id,
            previous_status: previous.to_string(),
        })
        .await;

        Ok(Outcome::Cancelled { order })
    }

    /// Export the artifacts of an issued order again.
    pub async fn reinstall(
        &self,
        account_id: AccountId,
        order_id: OrderId,
    ) -> Result<Outcome, LifecycleError> {
        self.active_account(account_id)?;
        let order = self.load(account_id, order_id)?;
        if order.status != OrderStatus::Issued {
            return Err(LifecycleError::InvalidState {
                order_id,
                status: order.status,
                operation: "reinstall",
            });
        }

        self.leased(&order, |fresh| self.reexport_locked(fresh, false))
            .await
    }

    /// Renew an issued certificate through the client, then export it.
    pub async fn renew(
        &self,
        account_id: AccountId,
        order_id: OrderId,
    ) -> Result<Outcome, LifecycleError> {
        self.active_account(account_id)?;
        let order = self.load(account_id, order_id)?;
        if order.status != OrderStatus::Issued {
            return Err(LifecycleError::InvalidState {
                order_id,
                status: order.status,
                operation: "renew",
            });
        }

        self.leased(&order, |fresh| self.reexport_locked(fresh, true))
            .await
    }

    /// Public URLs of the four exported files.
    pub fn download_info(
        &self,
        account_id: AccountId,
        order_id: OrderId,
    ) -> Result<Vec<DownloadLink>, LifecycleError> {
        let order = self.load(account_id, order_id)?;
        match (order.status, order.domain.as_deref()) {
            (OrderStatus::Issued, Some(domain)) => Ok(download_links(&self.download_base_url, domain)),
            (status, _) => Err(LifecycleError::InvalidState {
                order_id,
                status,
                operation: "download",
            }),
        }
    }

    /// Sizes and fingerprints of the exported files.
    pub async fn certificate_info(
        &self,
        account_id: AccountId,
        order_id: OrderId,
    ) -> Result<ArtifactSet, LifecycleError> {
        let order = self.load(account_id, order_id)?;
        match (order.status, order.domain.as_deref()) {
            (OrderStatus::Issued, Some(domain)) => {
                Ok(self.coordinator.describe_artifacts(domain).await?)
            }
            (status, _) => Err(LifecycleError::InvalidState {
                order_id,
                status,
                operation: "describe",
            }),
        }
    }

    /// One page of the account's orders, newest first. Pages are 1-based
    /// and clamped to the available range.
    pub fn list_orders(&self, account_id: AccountId, page: u32) -> Result<OrderPage, LifecycleError> {
        let filter = OrderFilter::new().with_owner(account_id);
        let total = self.orders.count(&filter)?.max(0) as u64;
        let page_size = self.config.page_size.max(1);
        let total_pages = total.div_ceil(page_size as u64).max(1) as u32;
        let page = page.clamp(1, total_pages);

        let orders = self.orders.list(
            &filter
                .with_limit(page_size as i64)
                .with_offset(((page - 1) * page_size) as i64),
        )?;

        Ok(OrderPage {
            orders,
            page,
            total_pages,
            total,
        })
    }

    pub fn find_latest_order(&self, account_id: AccountId) -> Result<Option<CertOrder>, LifecycleError> {
        Ok(self.orders.latest(account_id)?)
    }

    pub fn latest_pending_domain(
        &self,
        account_id: AccountId,
    ) -> Result<Option<CertOrder>, LifecycleError> {
        Ok(self.orders.latest_awaiting_domain(account_id)?)
    }

    /// Record a failure that happened outside the engine.
    pub async fn record_error(
        &self,
        account_id: AccountId,
        order_id: Option<OrderId>,
        message: &str,
    ) -> Result<(), LifecycleError> {
        if let Some(order_id) = order_id {
            let order = self.load(account_id, order_id)?;
            if order.status != OrderStatus::Cancelled {
                self.orders
                    .update(order.id, &OrderUpdate::new().with_error(message))?;
            }
        }

        warn!(account_id, ?order_id, message, "Error recorded");
        self.emit(AuditEvent::ErrorRecorded {
            order_id,
            account_id,
            message: message.to_string(),
        })
        .await;
        Ok(())
    }

    /// Run a decoded action token.
    pub async fn dispatch(
        &self,
        account_id: AccountId,
        action: OrderAction,
    ) -> Result<ActionResponse, LifecycleError> {
        let outcome = match action {
            OrderAction::SetType {
                order_id,
                cert_type,
            } => self.set_type(account_id, order_id, cert_type).await?,
            OrderAction::Verify { order_id } => self.verify(account_id, order_id).await?,
            OrderAction::RetryChallenge { order_id } => {
                self.retry_challenge(account_id, order_id).await?
            }
            OrderAction::Status { order_id } => self.status_by_id(account_id, order_id).await?,
            OrderAction::Cancel { order_id } => self.cancel(account_id, order_id).await?,
            OrderAction::Reinstall { order_id } => self.reinstall(account_id, order_id).await?,
            OrderAction::Download { order_id } => {
                let links = self.download_info(account_id, order_id)?;
                let order = self.load(account_id, order_id)?;
                return Ok(ActionResponse::Downloads { order, links });
            }
            OrderAction::ListOrders { page } => {
                return Ok(ActionResponse::Orders(self.list_orders(account_id, page)?));
            }
        };
        Ok(ActionResponse::Order(outcome))
    }

    // ========================================================================
    // Stage drivers (shared with the batch sweep)
    // ========================================================================

    /// Generate a challenge for an order that has its type and domain.
    pub async fn drive_challenge(&self, order: &CertOrder) -> Result<Outcome, LifecycleError> {
        if let Some(outcome) = self.retry_exhausted(order) {
            return Ok(outcome);
        }
        self.leased(order, |fresh| self.generate_locked(fresh)).await
    }

    /// Propagation check for `dns_wait`, issue/install for `dns_verified`.
    pub async fn drive_verification(&self, order: &CertOrder) -> Result<Outcome, LifecycleError> {
        if let Some(outcome) = self.retry_exhausted(order) {
            return Ok(outcome);
        }
        self.leased(order, |fresh| self.verify_locked(fresh)).await
    }

    /// Retry only the export of an issued-but-not-installed order.
    pub async fn drive_install(&self, order: &CertOrder) -> Result<Outcome, LifecycleError> {
        if let Some(outcome) = self.retry_exhausted(order) {
            return Ok(outcome);
        }
        self.leased(order, |fresh| self.install_locked(fresh)).await
    }

    fn retry_exhausted(&self, order: &CertOrder) -> Option<Outcome> {
        (order.attempts >= self.config.retry_limit).then(|| {
            debug!(order_id = order.id, attempts = order.attempts, "Retry limit reached");
            Outcome::RetryLimitReached {
                order: order.clone(),
            }
        })
    }

    /// Runs `run` on a freshly read order while holding the cooldown lease.
    async fn leased<F, Fut>(&self, order: &CertOrder, run: F) -> Result<Outcome, LifecycleError>
    where
        F: FnOnce(CertOrder) -> Fut,
        Fut: Future<Output = Result<Outcome, LifecycleError>>,
    {
        if !self.guard.try_acquire(order)? {
            let current = self
                .orders
                .get_by_id(order.id)?
                .unwrap_or_else(|| order.clone());
            let retry_after = self
                .guard
                .remaining(&current)
                .unwrap_or_else(|| self.config.cooldown());
            return Ok(Outcome::CoolingDown {
                order: current,
                retry_after,
            });
        }

        let result = match self.orders.get_by_id(order.id) {
            Ok(Some(fresh)) => run(fresh).await,
            Ok(None) => Err(LifecycleError::OrderNotFound(order.id)),
            Err(e) => Err(e.into()),
        };
        let result = self.unless_cancelled(order.id, result);

        if let Err(e) = self.guard.release(order) {
            warn!(order_id = order.id, error = %e, "Failed to release order lease");
        }
        result
    }

    /// Cancel does not wait for the lease, so it can land while the client
    /// runs. The cancellation wins over whatever the run produced.
    fn unless_cancelled(
        &self,
        order_id: OrderId,
        result: Result<Outcome, LifecycleError>,
    ) -> Result<Outcome, LifecycleError> {
        match self.orders.get_by_id(order_id) {
            Ok(Some(current)) if current.status == OrderStatus::Cancelled => {
                if let Err(ref e) = result {
                    debug!(order_id, error = %e, "Order cancelled during operation");
                }
                Ok(Outcome::Cancelled { order: current })
            }
            _ => result,
        }
    }

    async fn generate_locked(&self, order: CertOrder) -> Result<Outcome, LifecycleError> {
        let eligible = matches!(
            order.status,
            OrderStatus::Created | OrderStatus::DnsWait | OrderStatus::Failed
        );
        let (Some(cert_type), Some(domain), true) = (order.cert_type, order.domain.clone(), eligible)
        else {
            return Ok(Outcome::Updated { order });
        };

        match self.coordinator.generate_challenge(&domain, cert_type).await {
            Ok(challenge) => {
                let update = OrderUpdate::new()
                    .with_status(OrderStatus::DnsWait)
                    .with_challenge(challenge.clone())
                    .with_needs_challenge(false)
                    .with_install_pending(false)
                    .clear_error();
                let updated = self
                    .transition(&order, &update, Some("challenge generated"))
                    .await?;

                self.emit(AuditEvent::ChallengeGenerated {
                    order_id: order.id,
                    account_id: order.owner_id,
                    domain,
                    host: challenge.host.clone(),
                    value_count: challenge.values.len(),
                })
                .await;

                Ok(Outcome::ChallengeReady {
                    order: updated,
                    challenge,
                })
            }
            Err(e) => self.fail(&order, &e).await,
        }
    }

    async fn verify_locked(&self, order: CertOrder) -> Result<Outcome, LifecycleError> {
        match order.status {
            OrderStatus::DnsWait => {}
            OrderStatus::DnsVerified => return self.issue_locked(order).await,
            _ => return Ok(Outcome::Updated { order }),
        }
        let Some(challenge) = order.challenge() else {
            return Ok(Outcome::Updated { order });
        };

        match self
            .coordinator
            .verify_propagation(&challenge.host, &challenge.values)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(order_id = order.id, host = %challenge.host, "TXT records not visible yet");
                return Ok(Outcome::NotPropagated { order });
            }
            Err(e) => {
                // Lookup trouble is not a tool failure; the order keeps waiting.
                warn!(order_id = order.id, error = %e, "TXT lookup failed");
                let order = self
                    .orders
                    .update(order.id, &OrderUpdate::new().with_error(e.to_string()))?;
                return Ok(Outcome::NotPropagated { order });
            }
        }

        let order = self
            .transition(
                &order,
                &OrderUpdate::new().with_status(OrderStatus::DnsVerified),
                Some("TXT records visible"),
            )
            .await?;
        self.issue_locked(order).await
    }

    async fn install_locked(&self, order: CertOrder) -> Result<Outcome, LifecycleError> {
        if order.status != OrderStatus::DnsVerified || !order.install_pending {
            return Ok(Outcome::Updated { order });
        }
        self.issue_locked(order).await
    }

    async fn issue_locked(&self, order: CertOrder) -> Result<Outcome, LifecycleError> {
        let (Some(cert_type), Some(domain)) = (order.cert_type, order.domain.clone()) else {
            return Ok(Outcome::Updated { order });
        };

        let result = if order.install_pending {
            self.coordinator.install_artifacts(&domain).await
        } else {
            self.coordinator.issue_and_install(&domain, cert_type).await
        };

        match result {
            Ok(artifacts) => self.installed(order, artifacts, false).await,
            Err(e) if e.is_install_failure() => self.install_failed(&order, &e).await,
            Err(e) => self.fail(&order, &e).await,
        }
    }

    /// Export an issued order again, renewing it first if asked to.
    ///
    /// Failures leave the order `issued`; the previous export stays in place.
    async fn reexport_locked(&self, order: CertOrder, renew: bool) -> Result<Outcome, LifecycleError> {
        let (Some(cert_type), Some(domain)) = (order.cert_type, order.domain.clone()) else {
            return Ok(Outcome::Updated { order });
        };
        if order.status != OrderStatus::Issued {
            return Ok(Outcome::Updated { order });
        }

        let result = if renew {
            self.coordinator.renew_and_install(&domain, cert_type).await
        } else {
            self.coordinator.install_artifacts(&domain).await
        };

        match result {
            Ok(artifacts) => self.installed(order, artifacts, true).await,
            Err(e) => {
                let message = e.to_string();
                warn!(order_id = order.id, renew, error = %message, "Re-export failed");
                let updated = self
                    .orders
                    .update(order.id, &OrderUpdate::new().with_error(message.as_str()))?;
                self.emit(AuditEvent::OrderFailed {
                    order_id: order.id,
                    account_id: order.owner_id,
                    stage: e.stage().to_string(),
                    error: message.clone(),
                    attempts: order.attempts,
                })
                .await;
                Ok(Outcome::Failed {
                    order: updated,
                    error: message,
                })
            }
        }
    }

    async fn installed(
        &self,
        order: CertOrder,
        artifacts: ArtifactSet,
        reinstall: bool,
    ) -> Result<Outcome, LifecycleError> {
        let update = OrderUpdate::new()
            .with_status(OrderStatus::Issued)
            .with_attempts(0)
            .with_install_pending(false)
            .clear_error();
        let reason = if reinstall { "reinstalled" } else { "certificate installed" };
        let updated = self.transition(&order, &update, Some(reason)).await?;

        self.emit(AuditEvent::CertificateInstalled {
            order_id: order.id,
            account_id: order.owner_id,
            domain: artifacts.domain.clone(),
            fingerprints: artifacts.files.iter().map(|f| f.sha256.clone()).collect(),
            reinstall,
        })
        .await;

        Ok(Outcome::Issued {
            order: updated,
            artifacts,
        })
    }

    /// Issued but not exported: stay in `dns_verified` so only the install is retried.
    async fn install_failed(
        &self,
        order: &CertOrder,
        error: &ChallengeError,
    ) -> Result<Outcome, LifecycleError> {
        let message = error.to_string();
        let attempts = order.attempts + 1;
        warn!(order_id = order.id, attempts, error = %message, "Certificate install failed");

        let updated = self.orders.update(
            order.id,
            &OrderUpdate::new()
                .with_install_pending(true)
                .with_error(message.as_str())
                .with_attempts(attempts),
        )?;

        self.emit(AuditEvent::OrderFailed {
            order_id: order.id,
            account_id: order.owner_id,
            stage: error.stage().to_string(),
            error: message.clone(),
            attempts,
        })
        .await;

        Ok(Outcome::InstallPending {
            order: updated,
            error: message,
        })
    }

    /// Move to `failed`; the next attempt starts over with a fresh challenge.
    async fn fail(&self, order: &CertOrder, error: &ChallengeError) -> Result<Outcome, LifecycleError> {
        let message = error.to_string();
        let attempts = order.attempts + 1;
        warn!(
            order_id = order.id,
            stage = error.stage(),
            attempts,
            error = %message,
            "Order failed"
        );

        let update = OrderUpdate::new()
            .with_status(OrderStatus::Failed)
            .with_error(message.as_str())
            .with_attempts(attempts)
            .with_needs_challenge(true)
            .with_install_pending(false);
        let updated = self.transition(order, &update, Some(error.stage())).await?;

        self.emit(AuditEvent::OrderFailed {
            order_id: order.id,
            account_id: order.owner_id,
            stage: error.stage().to_string(),
            error: message.clone(),
            attempts,
        })
        .await;

        Ok(Outcome::Failed {
            order: updated,
            error: message,
        })
    }

    /// Apply an update and audit the status change, if any.
    async fn transition(
        &self,
        order: &CertOrder,
        update: &OrderUpdate,
        reason: Option<&str>,
    ) -> Result<CertOrder, LifecycleError> {
        let updated = self.orders.update(order.id, update)?;

        if updated.status != order.status {
            info!(
                order_id = order.id,
                from = %order.status,
                to = %updated.status,
                "Order status changed"
            );
            self.emit(AuditEvent::OrderStateChanged {
                order_id: order.id,
                account_id: order.owner_id,
                from_status: order.status.to_string(),
                to_status: updated.status.to_string(),
                reason: reason.map(String::from),
            })
            .await;
        }
        Ok(updated)
    }
}
