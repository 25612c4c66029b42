use thiserror::Error;

use crate::account::AccountError;
use crate::challenge::ChallengeError;
use crate::order::{AccountId, OrderError, OrderId, OrderStatus};

/// Errors returned by lifecycle operations.
///
/// Expected conditions (propagation not visible yet, cooldown, retry
/// limit) are `Outcome` variants, not errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Order {0} not found")]
    OrderNotFound(OrderId),

    #[error("No order found for domain {0}")]
    DomainNotFound(String),

    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    #[error("Account {0} is banned")]
    Banned(AccountId),

    #[error("Account {0} has no issuance quota left")]
    QuotaExhausted(AccountId),

    #[error("Cannot {operation} order {order_id} in status {status}")]
    InvalidState {
        order_id: OrderId,
        status: OrderStatus,
        operation: &'static str,
    },

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Challenge(#[from] ChallengeError),
}

impl LifecycleError {
    /// Caller mistakes that were rejected before any state change.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidDomain { .. }
                | Self::Validation(_)
                | Self::OrderNotFound(_)
                | Self::DomainNotFound(_)
                | Self::Banned(_)
                | Self::QuotaExhausted(_)
                | Self::InvalidState { .. }
        )
    }
}
