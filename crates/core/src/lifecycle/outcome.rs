use std::time::Duration;

use serde::Serialize;

use crate::challenge::{ArtifactSet, DownloadLink};
use crate::order::{CertOrder, DnsChallenge};

/// Result of one lifecycle operation on an order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Stored without touching the ACME client (type chosen, status read).
    Updated { order: CertOrder },
    /// A challenge was generated; the records must be published.
    ChallengeReady {
        order: CertOrder,
        challenge: DnsChallenge,
    },
    /// Not every TXT value is visible yet.
    NotPropagated { order: CertOrder },
    Issued {
        order: CertOrder,
        artifacts: ArtifactSet,
    },
    /// Issued but not exported; install will be retried.
    InstallPending { order: CertOrder, error: String },
    Failed { order: CertOrder, error: String },
    /// Another operation holds the lease.
    CoolingDown {
        order: CertOrder,
        #[serde(with = "secs")]
        retry_after: Duration,
    },
    /// The order used up its tool attempts; a new order is needed.
    RetryLimitReached { order: CertOrder },
    Cancelled { order: CertOrder },
}

impl Outcome {
    pub fn order(&self) -> &CertOrder {
        match self {
            Outcome::Updated { order }
            | Outcome::ChallengeReady { order, .. }
            | Outcome::NotPropagated { order }
            | Outcome::Issued { order, .. }
            | Outcome::InstallPending { order, .. }
            | Outcome::Failed { order, .. }
            | Outcome::CoolingDown { order, .. }
            | Outcome::RetryLimitReached { order }
            | Outcome::Cancelled { order } => order,
        }
    }

    pub fn into_order(self) -> CertOrder {
        match self {
            Outcome::Updated { order }
            | Outcome::ChallengeReady { order, .. }
            | Outcome::NotPropagated { order }
            | Outcome::Issued { order, .. }
            | Outcome::InstallPending { order, .. }
            | Outcome::Failed { order, .. }
            | Outcome::CoolingDown { order, .. }
            | Outcome::RetryLimitReached { order }
            | Outcome::Cancelled { order } => order,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Updated { .. } => "updated",
            Outcome::ChallengeReady { .. } => "challenge_ready",
            Outcome::NotPropagated { .. } => "not_propagated",
            Outcome::Issued { .. } => "issued",
            Outcome::InstallPending { .. } => "install_pending",
            Outcome::Failed { .. } => "failed",
            Outcome::CoolingDown { .. } => "cooling_down",
            Outcome::RetryLimitReached { .. } => "retry_limit_reached",
            Outcome::Cancelled { .. } => "cancelled",
        }
    }

    /// Whether the ACME client or the resolver reported a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. } | Outcome::InstallPending { .. })
    }
}

/// One page of an account's orders, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct OrderPage {
    pub orders: Vec<CertOrder>,
    /// 1-based, clamped to the available range.
    pub page: u32,
    pub total_pages: u32,
    pub total: u64,
}

/// What a decoded action produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionResponse {
    Order(Outcome),
    Downloads {
        order: CertOrder,
        links: Vec<DownloadLink>,
    },
    Orders(OrderPage),
}

mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}
