use std::sync::Arc;

use tokio::sync::mpsc;

use super::{AuditEventEnvelope, AuditHandle, AuditRecord, AuditStore};

/// Background task that drains audit events into storage
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditEventEnvelope>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<AuditEventEnvelope>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Consume events until every `AuditHandle` is dropped.
    ///
    /// Returns the number of events written.
    pub async fn run(mut self) -> u64 {
        tracing::debug!("Audit writer started");
        let mut written = 0u64;

        while let Some(envelope) = self.rx.recv().await {
            let record = AuditRecord::from_event(envelope.timestamp, envelope.event);
            match self.store.insert(&record) {
                Ok(_) => written += 1,
                Err(e) => tracing::error!(
                    event_type = %record.event_type,
                    error = %e,
                    "Failed to write audit event"
                ),
            }
        }

        tracing::debug!(written, "Audit writer shutting down");
        written
    }
}

/// Create a complete audit system
///
/// Spawn the writer with `tokio::spawn(writer.run())`; it exits once the
/// returned handle and all its clones are dropped, so awaiting the join
/// handle after dropping them flushes every pending event.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (AuditHandle::new(tx), AuditWriter::new(rx, store))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::audit::{AuditError, AuditEvent, AuditFilter, SqliteAuditStore};

    /// Store whose inserts always fail
    struct FailingStore {
        attempts: Mutex<u32>,
    }

    impl AuditStore for FailingStore {
        fn insert(&self, _record: &AuditRecord) -> Result<i64, AuditError> {
            *self.attempts.lock().unwrap() += 1;
            Err(AuditError::Database("Mock failure".to_string()))
        }

        fn query(&self, _filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
            Ok(Vec::new())
        }

        fn count(&self, _filter: &AuditFilter) -> Result<i64, AuditError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_writer_flushes_on_handle_drop() {
        let store = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let (handle, writer) = create_audit_system(store.clone(), 10);
        let task = tokio::spawn(writer.run());

        for order_id in 1..=3 {
            handle
                .emit(AuditEvent::OrderCancelled {
                    order_id,
                    account_id: 1,
                    previous_status: "dns_wait".to_string(),
                })
                .await;
        }
        drop(handle);

        assert_eq!(task.await.unwrap(), 3);
        assert_eq!(store.count(&AuditFilter::new().with_account(1)).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_writer_survives_store_errors() {
        let store = Arc::new(FailingStore {
            attempts: Mutex::new(0),
        });
        let (handle, writer) = create_audit_system(store.clone(), 10);
        let task = tokio::spawn(writer.run());

        handle
            .emit(AuditEvent::ServiceStopped {
                reason: "a".to_string(),
            })
            .await;
        handle
            .emit(AuditEvent::ServiceStopped {
                reason: "b".to_string(),
            })
            .await;
        drop(handle);

        assert_eq!(task.await.unwrap(), 0);
        assert_eq!(*store.attempts.lock().unwrap(), 2);
    }
}
