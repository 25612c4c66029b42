//! Accounts that own orders: role, quota, ban flag and pending prompt.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteAccountStore;
pub use store::{AccountError, AccountStore};
pub use types::{Account, PendingAction, Role};
