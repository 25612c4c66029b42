//! Order storage trait and types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{AccountId, CertOrder, OrderId, OrderStatus, OrderUpdate};

/// Error type for order storage operations.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    #[error("Order {order_id}: cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("Order {order_id}: {reason}")]
    InvalidUpdate { order_id: OrderId, reason: String },

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for OrderError {
    fn from(e: rusqlite::Error) -> Self {
        OrderError::Database(e.to_string())
    }
}

/// Filter for querying orders.
#[derive(Debug, Clone)]
pub struct OrderFilter {
    /// Match any of these statuses (empty = all).
    pub statuses: Vec<OrderStatus>,
    pub owner_id: Option<AccountId>,
    pub needs_challenge: Option<bool>,
    pub install_pending: Option<bool>,
    /// Only orders whose type and domain are both set.
    pub ready_for_tool: bool,
    /// Only orders whose lock has lapsed at this instant.
    pub unlocked_at: Option<DateTime<Utc>>,
    /// Only orders with fewer consecutive failures than this.
    pub attempts_below: Option<u32>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderFilter {
    pub fn new() -> Self {
        Self {
            statuses: Vec::new(),
            owner_id: None,
            needs_challenge: None,
            install_pending: None,
            ready_for_tool: false,
            unlocked_at: None,
            attempts_below: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_owner(mut self, owner_id: AccountId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn with_needs_challenge(mut self, needs: bool) -> Self {
        self.needs_challenge = Some(needs);
        self
    }

    pub fn with_install_pending(mut self, pending: bool) -> Self {
        self.install_pending = Some(pending);
        self
    }

    pub fn ready_for_tool(mut self) -> Self {
        self.ready_for_tool = true;
        self
    }

    pub fn unlocked_at(mut self, now: DateTime<Utc>) -> Self {
        self.unlocked_at = Some(now);
        self
    }

    pub fn with_attempts_below(mut self, limit: u32) -> Self {
        self.attempts_below = Some(limit);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for order storage backends.
///
/// Lookups scoped by `owner_id` never return another account's order.
pub trait OrderStore: Send + Sync {
    /// Create a new order in `created` with `needs_challenge` set.
    fn create(&self, owner_id: AccountId) -> Result<CertOrder, OrderError>;

    /// Get an order owned by `owner_id`.
    fn get(&self, owner_id: AccountId, id: OrderId) -> Result<Option<CertOrder>, OrderError>;

    /// Get an order regardless of owner.
    fn get_by_id(&self, id: OrderId) -> Result<Option<CertOrder>, OrderError>;

    /// Most recent order of `owner_id` for `domain`.
    fn get_by_domain(
        &self,
        owner_id: AccountId,
        domain: &str,
    ) -> Result<Option<CertOrder>, OrderError>;

    /// Most recent order of `owner_id`.
    fn latest(&self, owner_id: AccountId) -> Result<Option<CertOrder>, OrderError>;

    /// Most recent order of `owner_id` that has a type but no domain yet.
    fn latest_awaiting_domain(&self, owner_id: AccountId)
        -> Result<Option<CertOrder>, OrderError>;

    /// Apply a partial update.
    ///
    /// Rejects status changes outside the transition table, a second
    /// domain or type, and challenge-bearing statuses without a challenge.
    fn update(&self, id: OrderId, update: &OrderUpdate) -> Result<CertOrder, OrderError>;

    /// List orders matching the filter, newest first.
    fn list(&self, filter: &OrderFilter) -> Result<Vec<CertOrder>, OrderError>;

    /// Count orders matching the filter (limit and offset ignored).
    fn count(&self, filter: &OrderFilter) -> Result<i64, OrderError>;

    /// Atomically take the order lock until `until` if it is free at `now`.
    fn try_lock(
        &self,
        id: OrderId,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool, OrderError>;

    /// Unconditionally set the order lock expiry.
    fn set_lock(&self, id: OrderId, until: DateTime<Utc>) -> Result<(), OrderError>;

    /// Atomically take the domain lock for `order_id` if it is free or
    /// already held by the same order.
    fn try_lock_domain(
        &self,
        domain: &str,
        order_id: OrderId,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool, OrderError>;

    /// Set the domain lock expiry if `order_id` holds it.
    fn set_domain_lock(
        &self,
        domain: &str,
        order_id: OrderId,
        until: DateTime<Utc>,
    ) -> Result<(), OrderError>;
}
