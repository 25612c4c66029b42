//! Mock TXT resolver for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::dns::{DnsError, TxtResolver};

/// Mock implementation of the TxtResolver trait.
///
/// Records are "published" by the test; lookups for anything else return
/// an empty answer, as a real resolver would before propagation.
#[derive(Debug, Default)]
pub struct MockTxtResolver {
    records: Arc<RwLock<HashMap<String, Vec<String>>>>,
    lookups: Arc<RwLock<Vec<String>>>,
    next_error: Arc<RwLock<Option<DnsError>>>,
}

impl MockTxtResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `values` at `host`, replacing whatever was there.
    pub async fn publish(&self, host: &str, values: &[String]) {
        self.records
            .write()
            .await
            .insert(host.to_string(), values.to_vec());
    }

    /// Remove every record at `host`.
    pub async fn unpublish(&self, host: &str) {
        self.records.write().await.remove(host);
    }

    /// Hosts looked up so far, in order.
    pub async fn lookups(&self) -> Vec<String> {
        self.lookups.read().await.clone()
    }

    /// Configure the next lookup to fail with the given error.
    pub async fn set_next_error(&self, error: DnsError) {
        *self.next_error.write().await = Some(error);
    }
}

#[async_trait]
impl TxtResolver for MockTxtResolver {
    async fn lookup_txt(&self, host: &str) -> Result<Vec<String>, DnsError> {
        self.lookups.write().await.push(host.to_string());
        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }
        Ok(self
            .records
            .read()
            .await
            .get(host)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_lookup() {
        let resolver = MockTxtResolver::new();
        let host = "_acme-challenge.example.com";

        assert!(resolver.lookup_txt(host).await.unwrap().is_empty());

        resolver.publish(host, &["abc".to_string()]).await;
        assert_eq!(resolver.lookup_txt(host).await.unwrap(), vec!["abc"]);

        resolver.unpublish(host).await;
        assert!(resolver.lookup_txt(host).await.unwrap().is_empty());
        assert_eq!(resolver.lookups().await.len(), 3);
    }

    #[tokio::test]
    async fn test_next_error_is_one_shot() {
        let resolver = MockTxtResolver::new();
        resolver
            .set_next_error(DnsError::Timeout {
                host: "x".to_string(),
            })
            .await;

        assert!(resolver.lookup_txt("x").await.is_err());
        assert!(resolver.lookup_txt("x").await.is_ok());
    }
}
