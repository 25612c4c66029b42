//! Order lifecycle: domain validation, the state machine and its outcomes.

mod domain;
mod engine;
mod error;
mod outcome;

pub use domain::normalize_domain;
pub use engine::LifecycleEngine;
pub use error::LifecycleError;
pub use outcome::{ActionResponse, OrderPage, Outcome};
