use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::order::{AccountId, OrderId};

/// Audit event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Accounts
    AccountRegistered {
        account_id: AccountId,
        external_id: String,
        role: String,
    },
    QuotaGranted {
        account_id: AccountId,
        amount: u32,
        quota: u32,
    },

    // Order lifecycle
    OrderCreated {
        order_id: OrderId,
        account_id: AccountId,
        /// Remaining quota after this order, `None` for privileged accounts.
        quota_left: Option<u32>,
    },
    OrderStateChanged {
        order_id: OrderId,
        account_id: AccountId,
        from_status: String,
        to_status: String,
        reason: Option<String>,
    },
    ChallengeGenerated {
        order_id: OrderId,
        account_id: AccountId,
        domain: String,
        host: String,
        value_count: usize,
    },
    OrderFailed {
        order_id: OrderId,
        account_id: AccountId,
        /// Tool step that failed ("challenge", "issue", "install", ...).
        stage: String,
        error: String,
        attempts: u32,
    },
    OrderCancelled {
        order_id: OrderId,
        account_id: AccountId,
        previous_status: String,
    },
    CertificateInstalled {
        order_id: OrderId,
        account_id: AccountId,
        domain: String,
        /// SHA-256 of each exported file, in export order.
        fingerprints: Vec<String>,
        reinstall: bool,
    },
    /// Failure reported by a caller outside the engine.
    ErrorRecorded {
        order_id: Option<OrderId>,
        account_id: AccountId,
        message: String,
    },

    // Batch
    SweepCompleted {
        dns_processed: u32,
        dns_failed: u32,
        issue_processed: u32,
        issue_failed: u32,
        install_processed: u32,
        install_failed: u32,
        duration_ms: u64,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::AccountRegistered { .. } => "account_registered",
            Self::QuotaGranted { .. } => "quota_granted",
            Self::OrderCreated { .. } => "order_created",
            Self::OrderStateChanged { .. } => "order_state_changed",
            Self::ChallengeGenerated { .. } => "challenge_generated",
            Self::OrderFailed { .. } => "order_failed",
            Self::OrderCancelled { .. } => "order_cancelled",
            Self::CertificateInstalled { .. } => "certificate_installed",
            Self::ErrorRecorded { .. } => "error_recorded",
            Self::SweepCompleted { .. } => "sweep_completed",
        }
    }

    /// Extract the order id if this event concerns one order
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            Self::OrderCreated { order_id, .. }
            | Self::OrderStateChanged { order_id, .. }
            | Self::ChallengeGenerated { order_id, .. }
            | Self::OrderFailed { order_id, .. }
            | Self::OrderCancelled { order_id, .. }
            | Self::CertificateInstalled { order_id, .. } => Some(*order_id),
            Self::ErrorRecorded { order_id, .. } => *order_id,
            _ => None,
        }
    }

    /// Extract the account id if this event concerns one account
    pub fn account_id(&self) -> Option<AccountId> {
        match self {
            Self::AccountRegistered { account_id, .. }
            | Self::QuotaGranted { account_id, .. }
            | Self::OrderCreated { account_id, .. }
            | Self::OrderStateChanged { account_id, .. }
            | Self::ChallengeGenerated { account_id, .. }
            | Self::OrderFailed { account_id, .. }
            | Self::OrderCancelled { account_id, .. }
            | Self::CertificateInstalled { account_id, .. }
            | Self::ErrorRecorded { account_id, .. } => Some(*account_id),
            Self::ServiceStarted { .. }
            | Self::ServiceStopped { .. }
            | Self::SweepCompleted { .. } => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub order_id: Option<OrderId>,
    pub account_id: Option<AccountId>,
    pub data: AuditEvent,
}

impl AuditRecord {
    /// Build an unsaved record (id 0) from an event.
    pub fn from_event(timestamp: DateTime<Utc>, event: AuditEvent) -> Self {
        Self {
            id: 0,
            timestamp,
            event_type: event.event_type().to_string(),
            order_id: event.order_id(),
            account_id: event.account_id(),
            data: event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_events_have_no_keys() {
        let event = AuditEvent::ServiceStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc123".to_string(),
        };
        assert_eq!(event.event_type(), "service_started");
        assert_eq!(event.order_id(), None);
        assert_eq!(event.account_id(), None);
    }

    #[test]
    fn test_order_failed_keys() {
        let event = AuditEvent::OrderFailed {
            order_id: 7,
            account_id: 3,
            stage: "challenge".to_string(),
            error: "exit 1".to_string(),
            attempts: 1,
        };
        assert_eq!(event.event_type(), "order_failed");
        assert_eq!(event.order_id(), Some(7));
        assert_eq!(event.account_id(), Some(3));
    }

    #[test]
    fn test_error_recorded_without_order() {
        let event = AuditEvent::ErrorRecorded {
            order_id: None,
            account_id: 3,
            message: "handler crashed".to_string(),
        };
        assert_eq!(event.order_id(), None);
        assert_eq!(event.account_id(), Some(3));
    }

    #[test]
    fn test_serialization_is_tagged() {
        let event = AuditEvent::OrderStateChanged {
            order_id: 1,
            account_id: 2,
            from_status: "dns_wait".to_string(),
            to_status: "dns_verified".to_string(),
            reason: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "order_state_changed");
        assert_eq!(json["to_status"], "dns_verified");

        let back: AuditEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_record_from_event() {
        let record = AuditRecord::from_event(
            Utc::now(),
            AuditEvent::OrderCancelled {
                order_id: 4,
                account_id: 9,
                previous_status: "dns_wait".to_string(),
            },
        );
        assert_eq!(record.id, 0);
        assert_eq!(record.event_type, "order_cancelled");
        assert_eq!(record.order_id, Some(4));
        assert_eq!(record.account_id, Some(9));
    }
}
