use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{KeyValueStore, StoreConfig, StoreError};

/// Wraps a store so no call can outlive the configured timeout.
pub struct BoundedStore {
    inner: Arc<dyn KeyValueStore>,
    timeout: Duration,
}

impl BoundedStore {
    #[must_use]
    pub fn new(inner: Arc<dyn KeyValueStore>, config: &StoreConfig) -> Self {
        Self {
            inner,
            timeout: config.operation_timeout(),
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = Result<T, StoreError>> + Send,
    ) -> Result<T, StoreError> {
        if let Ok(result) = tokio::time::timeout(self.timeout, future).await {
            result
        } else {
            warn!(operation, timeout = ?self.timeout, "store operation timed out");
            Err(StoreError::Timeout(self.timeout))
        }
    }
}

#[async_trait]
impl KeyValueStore for BoundedStore {
    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.bounded("get", self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.bounded("set", self.inner.set(key, value, ttl)).await
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.bounded("incr", self.inner.incr(key)).await
    }

    async fn decr(&self, key: &str) -> Result<i64, StoreError> {
        self.bounded("decr", self.inner.decr(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.bounded("expire", self.inner.expire(key, ttl)).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.bounded("ttl", self.inner.ttl(key)).await
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        self.bounded("del", self.inner.del(key)).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.bounded("keys", self.inner.keys(pattern)).await
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        self.bounded("delete_pattern", self.inner.delete_pattern(pattern))
            .await
    }

    async fn push_bounded(
        &self,
        key: &str,
        value: &str,
        max_len: usize,
    ) -> Result<usize, StoreError> {
        self.bounded(
            "push_bounded",
            self.inner.push_bounded(key, value, max_len),
        )
        .await
    }

    async fn list(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.bounded("list", self.inner.list(key)).await
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.bounded("set_add", self.inner.set_add(key, member)).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.bounded("set_members", self.inner.set_members(key))
            .await
    }
}
