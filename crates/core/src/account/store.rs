use thiserror::Error;

use super::{Account, PendingAction, Role};
use crate::order::AccountId;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Account not found: {0}")]
    NotFound(AccountId),

    #[error("The owner account cannot be modified this way")]
    OwnerImmutable,

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for AccountError {
    fn from(e: rusqlite::Error) -> Self {
        AccountError::Database(e.to_string())
    }
}

/// Trait for account storage backends.
pub trait AccountStore: Send + Sync {
    /// Register an account, or refresh the username of an existing one.
    ///
    /// The very first account registered becomes the owner.
    fn register(&self, external_id: &str, username: Option<&str>)
        -> Result<Account, AccountError>;

    fn get(&self, id: AccountId) -> Result<Option<Account>, AccountError>;

    fn get_by_external_id(&self, external_id: &str) -> Result<Option<Account>, AccountError>;

    fn find_by_username(&self, username: &str) -> Result<Option<Account>, AccountError>;

    /// Atomically take one unit of quota. Returns false when none is left.
    fn consume_quota(&self, id: AccountId) -> Result<bool, AccountError>;

    /// Give back one unit taken by `consume_quota`.
    fn refund_quota(&self, id: AccountId) -> Result<(), AccountError>;

    /// Add `amount` units of quota.
    fn grant_quota(&self, id: AccountId, amount: u32) -> Result<Account, AccountError>;

    fn set_banned(&self, id: AccountId, banned: bool) -> Result<Account, AccountError>;

    /// Change the role of a non-owner account to admin or user.
    fn set_role(&self, id: AccountId, role: Role) -> Result<Account, AccountError>;

    /// Replace the pending action slot.
    fn set_pending_action(
        &self,
        id: AccountId,
        action: PendingAction,
    ) -> Result<(), AccountError>;

    fn clear_pending_action(&self, id: AccountId) -> Result<(), AccountError>;
}
