//! Core certificate order data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a certificate order (SQLite rowid, newest = highest).
pub type OrderId = i64;

/// Identifier of the account that owns an order.
pub type AccountId = i64;

// ============================================================================
// Certificate type
// ============================================================================

/// Kind of certificate requested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CertType {
    /// One name, either an apex (`example.com`) or a subdomain (`www.example.com`).
    Single,
    /// `*.example.com` together with the apex `example.com`.
    Wildcard,
}

impl CertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertType::Single => "single",
            CertType::Wildcard => "wildcard",
        }
    }

    /// Names passed to the ACME client for this type and domain.
    pub fn requested_names(&self, domain: &str) -> Vec<String> {
        match self {
            CertType::Single => vec![domain.to_string()],
            CertType::Wildcard => vec![domain.to_string(), format!("*.{}", domain)],
        }
    }
}

impl fmt::Display for CertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            // "root" is what older clients send for single-name certificates
            "single" | "root" => Ok(CertType::Single),
            "wildcard" => Ok(CertType::Wildcard),
            other => Err(format!("unknown certificate type: {}", other)),
        }
    }
}

// ============================================================================
// Status state machine
// ============================================================================

/// Status of a certificate order.
///
/// State machine flow:
/// ```text
/// Created -> DnsWait -> DnsVerified -> Issued
///    |          |  ^         |            |
///    v          v  |         v            v
///  Failed <-----+--+-------Failed      (reinstall)
///
/// Any non-terminal state can transition to Cancelled.
/// Failed is recoverable (back to DnsWait); Issued and Cancelled are terminal.
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order exists; type and/or domain may still be missing.
    Created,
    /// Challenge published to the user, waiting for the TXT record to propagate.
    DnsWait,
    /// TXT record seen; issuance or installation still pending.
    DnsVerified,
    /// Certificate issued and exported (terminal, reinstall allowed).
    Issued,
    /// Last tool interaction failed (recoverable).
    Failed,
    /// Cancelled by the owner (terminal).
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Created,
        OrderStatus::DnsWait,
        OrderStatus::DnsVerified,
        OrderStatus::Issued,
        OrderStatus::Failed,
        OrderStatus::Cancelled,
    ];

    /// Returns the status as stored and filtered on.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::DnsWait => "dns_wait",
            OrderStatus::DnsVerified => "dns_verified",
            OrderStatus::Issued => "issued",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true if no operation may move the order anywhere else.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Issued | OrderStatus::Cancelled)
    }

    /// Returns true if the order can be cancelled from this status.
    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if this status requires a published challenge.
    pub fn requires_challenge(&self) -> bool {
        matches!(self, OrderStatus::DnsWait | OrderStatus::DnsVerified)
    }

    /// The single authoritative transition table.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        match (self, next) {
            (Created, Created | DnsWait | Failed | Cancelled) => true,
            (DnsWait, DnsWait | DnsVerified | Failed | Cancelled) => true,
            (DnsVerified, DnsVerified | Issued | Failed | Cancelled) => true,
            (Failed, Failed | DnsWait | Cancelled) => true,
            (Issued, Issued) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown order status: {}", s))
    }
}

// ============================================================================
// Order
// ============================================================================

/// DNS-01 challenge material the owner has to publish.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnsChallenge {
    /// TXT record name, e.g. `_acme-challenge.example.com`.
    pub host: String,
    /// Every value that must be present at `host`.
    pub values: Vec<String>,
}

/// A certificate order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CertOrder {
    pub id: OrderId,

    /// Account that requested the certificate.
    pub owner_id: AccountId,

    /// Chosen once, before the domain is submitted.
    pub cert_type: Option<CertType>,

    /// Target domain; immutable once set.
    pub domain: Option<String>,

    pub status: OrderStatus,

    /// A fresh challenge must be produced before verification can proceed.
    pub needs_challenge: bool,

    pub challenge_host: Option<String>,

    #[serde(default)]
    pub challenge_values: Vec<String>,

    /// Last failure message, cleared on success.
    pub last_error: Option<String>,

    /// Consecutive tool failures since the last successful step.
    #[serde(default)]
    pub attempts: u32,

    /// Issuance went through but exporting the artifacts did not.
    #[serde(default)]
    pub install_pending: bool,

    /// No mutating operation may start before this instant.
    pub locked_until: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl CertOrder {
    /// Returns the published challenge, if any.
    pub fn challenge(&self) -> Option<DnsChallenge> {
        match &self.challenge_host {
            Some(host) if !host.is_empty() && !self.challenge_values.is_empty() => {
                Some(DnsChallenge {
                    host: host.clone(),
                    values: self.challenge_values.clone(),
                })
            }
            _ => None,
        }
    }

    /// Returns true while the cooldown lock is held at `now`.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// Type chosen, domain still missing.
    pub fn awaits_domain(&self) -> bool {
        self.status == OrderStatus::Created && self.cert_type.is_some() && self.domain.is_none()
    }

    /// Names to request from the ACME client (empty until type and domain are set).
    pub fn requested_names(&self) -> Vec<String> {
        match (&self.cert_type, &self.domain) {
            (Some(cert_type), Some(domain)) => cert_type.requested_names(domain),
            _ => Vec::new(),
        }
    }
}

// ============================================================================
// Partial update
// ============================================================================

/// Partial update of an order. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderUpdate {
    pub status: Option<OrderStatus>,
    pub cert_type: Option<CertType>,
    pub domain: Option<String>,
    pub needs_challenge: Option<bool>,
    /// `Some(None)` clears the challenge.
    pub challenge: Option<Option<DnsChallenge>>,
    /// `Some(None)` clears the error.
    pub last_error: Option<Option<String>>,
    pub attempts: Option<u32>,
    pub install_pending: Option<bool>,
}

impl OrderUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_cert_type(mut self, cert_type: CertType) -> Self {
        self.cert_type = Some(cert_type);
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_needs_challenge(mut self, needs: bool) -> Self {
        self.needs_challenge = Some(needs);
        self
    }

    pub fn with_challenge(mut self, challenge: DnsChallenge) -> Self {
        self.challenge = Some(Some(challenge));
        self
    }

    pub fn clear_challenge(mut self) -> Self {
        self.challenge = Some(None);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(Some(error.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.last_error = Some(None);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_install_pending(mut self, pending: bool) -> Self {
        self.install_pending = Some(pending);
        self
    }

    /// Returns true if the update would not change anything.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the update to an in-memory copy of `order`.
    pub fn apply_to(&self, order: &mut CertOrder) {
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(cert_type) = self.cert_type {
            order.cert_type = Some(cert_type);
        }
        if let Some(ref domain) = self.domain {
            order.domain = Some(domain.clone());
        }
        if let Some(needs) = self.needs_challenge {
            order.needs_challenge = needs;
        }
        match &self.challenge {
            Some(Some(challenge)) => {
                order.challenge_host = Some(challenge.host.clone());
                order.challenge_values = challenge.values.clone();
            }
            Some(None) => {
                order.challenge_host = None;
                order.challenge_values.clear();
            }
            None => {}
        }
        if let Some(ref error) = self.last_error {
            order.last_error = error.clone();
        }
        if let Some(attempts) = self.attempts {
            order.attempts = attempts;
        }
        if let Some(pending) = self.install_pending {
            order.install_pending = pending;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(status: OrderStatus) -> CertOrder {
        CertOrder {
            id: 1,
            owner_id: 7,
            cert_type: Some(CertType::Wildcard),
            domain: Some("example.com".to_string()),
            status,
            needs_challenge: false,
            challenge_host: None,
            challenge_values: Vec::new(),
            last_error: None,
            attempts: 0,
            install_pending: false,
            locked_until: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(OrderStatus::Issued.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Failed.is_terminal());
        assert!(!OrderStatus::Failed.can_transition_to(OrderStatus::Issued));
    }

    #[test]
    fn test_no_transition_leaves_cancelled() {
        for next in OrderStatus::ALL {
            assert!(!OrderStatus::Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn test_issued_only_loops_to_itself() {
        for next in OrderStatus::ALL {
            assert_eq!(
                OrderStatus::Issued.can_transition_to(next),
                next == OrderStatus::Issued
            );
        }
    }

    #[test]
    fn test_forward_path() {
        assert!(OrderStatus::Created.can_transition_to(OrderStatus::DnsWait));
        assert!(OrderStatus::DnsWait.can_transition_to(OrderStatus::DnsVerified));
        assert!(OrderStatus::DnsVerified.can_transition_to(OrderStatus::Issued));
        assert!(OrderStatus::Failed.can_transition_to(OrderStatus::DnsWait));
        assert!(!OrderStatus::Created.can_transition_to(OrderStatus::Issued));
        assert!(!OrderStatus::DnsWait.can_transition_to(OrderStatus::Created));
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("pending".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_cert_type_names() {
        assert_eq!(
            CertType::Wildcard.requested_names("example.com"),
            vec!["example.com".to_string(), "*.example.com".to_string()]
        );
        assert_eq!(
            CertType::Single.requested_names("www.example.com"),
            vec!["www.example.com".to_string()]
        );
        assert_eq!("root".parse::<CertType>().unwrap(), CertType::Single);
    }

    #[test]
    fn test_challenge_requires_host_and_values() {
        let mut o = order(OrderStatus::DnsWait);
        assert!(o.challenge().is_none());
        o.challenge_host = Some("_acme-challenge.example.com".to_string());
        assert!(o.challenge().is_none());
        o.challenge_values = vec!["abc".to_string()];
        assert_eq!(o.challenge().unwrap().values, vec!["abc".to_string()]);
    }

    #[test]
    fn test_lock_window() {
        let now = Utc::now();
        let mut o = order(OrderStatus::DnsWait);
        assert!(!o.is_locked_at(now));
        o.locked_until = Some(now + chrono::Duration::seconds(30));
        assert!(o.is_locked_at(now));
        assert!(!o.is_locked_at(now + chrono::Duration::seconds(31)));
    }

    #[test]
    fn test_update_apply_clears_fields() {
        let mut o = order(OrderStatus::DnsWait);
        o.challenge_host = Some("_acme-challenge.example.com".to_string());
        o.challenge_values = vec!["abc".to_string()];
        o.last_error = Some("boom".to_string());

        OrderUpdate::new()
            .with_status(OrderStatus::Failed)
            .clear_challenge()
            .clear_error()
            .apply_to(&mut o);

        assert_eq!(o.status, OrderStatus::Failed);
        assert!(o.challenge_host.is_none());
        assert!(o.challenge_values.is_empty());
        assert!(o.last_error.is_none());
    }

    #[test]
    fn test_empty_update() {
        assert!(OrderUpdate::new().is_empty());
        assert!(!OrderUpdate::new().with_attempts(0).is_empty());
    }
}
