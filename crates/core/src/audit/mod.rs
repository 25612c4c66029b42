//! Audit trail of order and service events, keyed by order and account.

mod events;
mod handle;
mod sqlite;
mod store;
mod writer;

pub use events::*;
pub use handle::*;
pub use sqlite::*;
pub use store::*;
pub use writer::*;
