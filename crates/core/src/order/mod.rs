//! Certificate orders and their persisted state machine.

mod sqlite_store;
mod store;
mod types;

pub(crate) use sqlite_store::{parse_ts, ts};
pub use sqlite_store::SqliteOrderStore;
pub use store::{OrderError, OrderFilter, OrderStore};
pub use types::{
    AccountId, CertOrder, CertType, DnsChallenge, OrderId, OrderStatus, OrderUpdate,
};
