use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::AuditEvent;

/// Envelope wrapping an audit event with the time it was emitted
#[derive(Debug, Clone)]
pub struct AuditEventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

impl AuditEventEnvelope {
    fn now(event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Handle for emitting audit events
///
/// Cheaply cloneable. Events go through a bounded channel to the
/// `AuditWriter`; a full or closed channel is logged, never returned.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditEventEnvelope>,
}

impl AuditHandle {
    pub fn new(tx: mpsc::Sender<AuditEventEnvelope>) -> Self {
        Self { tx }
    }

    /// Emit an event, waiting for channel capacity.
    pub async fn emit(&self, event: AuditEvent) {
        let event_type = event.event_type();
        if self.tx.send(AuditEventEnvelope::now(event)).await.is_err() {
            tracing::error!(event_type, "Audit writer gone, event dropped");
        }
    }

    /// Emit an event without waiting. Returns false if it was dropped.
    pub fn try_emit(&self, event: AuditEvent) -> bool {
        let event_type = event.event_type();
        match self.tx.try_send(AuditEventEnvelope::now(event)) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(event_type, error = %e, "Failed to emit audit event");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stopped() -> AuditEvent {
        AuditEvent::ServiceStopped {
            reason: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_emit_event() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = AuditHandle::new(tx);

        handle
            .emit(AuditEvent::OrderCreated {
                order_id: 1,
                account_id: 2,
                quota_left: None,
            })
            .await;

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event.order_id(), Some(1));
    }

    #[tokio::test]
    async fn test_try_emit_full_channel() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = AuditHandle::new(tx);

        assert!(handle.try_emit(stopped()));
        assert!(!handle.try_emit(stopped()));
    }

    #[tokio::test]
    async fn test_emit_after_writer_gone_does_not_fail() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = AuditHandle::new(tx);

        handle.emit(stopped()).await;
        assert!(!handle.try_emit(stopped()));
    }
}
