//! Shared key-value store used for every piece of cross-request state.
//!
//! Counters, blacklists, ban records and violation lists all live behind
//! [`KeyValueStore`]. Every operation is individually atomic; no caller holds
//! a lock across calls. Implementations may become unavailable at any time,
//! and callers decide per call site whether to fail open or closed.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

mod bounded;
pub mod keys;
mod memory;

pub use bounded::BoundedStore;
pub use memory::MemoryStore;

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable")]
    Unavailable,
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("wrong value type for key {0}")]
    WrongType(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Cheap capability check; `false` means callers should skip the store.
    fn is_available(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Increment an integer counter, creating it at 1.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    async fn decr(&self, key: &str) -> Result<i64, StoreError>;

    /// Set a TTL on an existing key. Returns `false` when the key is missing.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remaining TTL, `None` when the key is missing or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Keys matching a glob pattern where `*` matches any run of characters.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError>;

    /// Prepend to a list and trim it to `max_len`. Returns the new length.
    async fn push_bounded(
        &self,
        key: &str,
        value: &str,
        max_len: usize,
    ) -> Result<usize, StoreError>;

    /// List contents, newest first.
    async fn list(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Add to a set. Returns `true` when the member was new.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    operation_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }
}

/// Match `key` against a glob where `*` matches zero or more characters.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern = pattern.as_bytes();
    let key = key.as_bytes();
    let (mut p, mut k) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while k < key.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some(p);
            p += 1;
            resume = k;
        } else if p < pattern.len() && pattern[p] == key[k] {
            p += 1;
            k += 1;
        } else if let Some(star_at) = star {
            p = star_at + 1;
            resume += 1;
            k = resume;
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use super::glob_match;

    #[test]
    fn glob_matches_prefix_and_suffix() {
        assert!(glob_match("banned:ip:*", "banned:ip:10.0.0.1"));
        assert!(glob_match("rate:*:login", "rate:auth:1.2.3.4:POST:login"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("banned:ip:*", "blacklist:abc"));
        assert!(!glob_match("rate:*:login", "rate:auth:1.2.3.4:POST:logout"));
    }

    #[test]
    fn glob_without_wildcard_is_exact() {
        assert!(glob_match("token_family:abc", "token_family:abc"));
        assert!(!glob_match("token_family:abc", "token_family:abcd"));
    }
}
