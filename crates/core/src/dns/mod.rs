//! TXT record lookups used to confirm challenge propagation.

mod hickory;

use async_trait::async_trait;
use thiserror::Error;

pub use hickory::HickoryTxtResolver;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("DNS lookup failed for '{host}': {reason}")]
    Lookup { host: String, reason: String },

    #[error("DNS lookup for '{host}' timed out")]
    Timeout { host: String },
}

/// Resolves TXT records without caching.
#[async_trait]
pub trait TxtResolver: Send + Sync {
    /// Returns every TXT string published at `host`.
    ///
    /// A name that does not exist yet yields an empty list, not an error.
    async fn lookup_txt(&self, host: &str) -> Result<Vec<String>, DnsError>;
}
