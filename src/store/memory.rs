//! In-process [`KeyValueStore`] with store-managed TTLs.
//!
//! Expiry follows the injected [`Clock`], so windows and bans can be tested by
//! moving a `ManualClock`. Expired keys are dropped lazily on access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::{KeyValueStore, StoreError, glob_match};
use crate::clock::{Clock, SystemClock, after};

#[derive(Debug)]
enum Value {
    Text(String),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage; every operation fails with `Unavailable` while unset.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn guard(&self) -> Result<DateTime<Utc>, StoreError> {
        if self.is_available() {
            Ok(self.clock.now())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    fn purge_if_expired(entries: &mut HashMap<String, Entry>, key: &str, now: DateTime<Utc>) {
        if entries.get(key).is_some_and(|entry| !entry.live(now)) {
            entries.remove(key);
        }
    }

    async fn add(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let now = self.guard()?;
        let mut entries = self.entries.lock().await;
        Self::purge_if_expired(&mut entries, key, now);
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            value: Value::Text("0".to_string()),
            expires_at: None,
        });
        let Value::Text(text) = &mut entry.value else {
            return Err(StoreError::WrongType(key.to_string()));
        };
        let current: i64 = text
            .parse()
            .map_err(|_| StoreError::WrongType(key.to_string()))?;
        let next = current.saturating_add(delta);
        *text = next.to_string();
        Ok(next)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.guard()?;
        let mut entries = self.entries.lock().await;
        Self::purge_if_expired(&mut entries, key, now);
        match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = self.guard()?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: ttl.map(|ttl| after(now, ttl)),
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.add(key, 1).await
    }

    async fn decr(&self, key: &str) -> Result<i64, StoreError> {
        self.add(key, -1).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.guard()?;
        let mut entries = self.entries.lock().await;
        Self::purge_if_expired(&mut entries, key, now);
        Ok(entries.get_mut(key).is_some_and(|entry| {
            entry.expires_at = Some(after(now, ttl));
            true
        }))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = self.guard()?;
        let mut entries = self.entries.lock().await;
        Self::purge_if_expired(&mut entries, key, now);
        Ok(entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .and_then(|at| at.signed_duration_since(now).to_std().ok()))
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.guard()?;
        let mut entries = self.entries.lock().await;
        Self::purge_if_expired(&mut entries, key, now);
        Ok(entries.remove(key).is_some())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = self.guard()?;
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.live(now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let now = self.guard()?;
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|key, entry| entry.live(now) && !glob_match(pattern, key));
        let removed = before - entries.len();
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }

    async fn push_bounded(
        &self,
        key: &str,
        value: &str,
        max_len: usize,
    ) -> Result<usize, StoreError> {
        let now = self.guard()?;
        let mut entries = self.entries.lock().await;
        Self::purge_if_expired(&mut entries, key, now);
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        });
        let Value::List(list) = &mut entry.value else {
            return Err(StoreError::WrongType(key.to_string()));
        };
        list.push_front(value.to_string());
        list.truncate(max_len);
        Ok(list.len())
    }

    async fn list(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let now = self.guard()?;
        let mut entries = self.entries.lock().await;
        Self::purge_if_expired(&mut entries, key, now);
        match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.iter().cloned().collect()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let now = self.guard()?;
        let mut entries = self.entries.lock().await;
        Self::purge_if_expired(&mut entries, key, now);
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            value: Value::Set(BTreeSet::new()),
            expires_at: None,
        });
        let Value::Set(set) = &mut entry.value else {
            return Err(StoreError::WrongType(key.to_string()));
        };
        Ok(set.insert(member.to_string()))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let now = self.guard()?;
        let mut entries = self.entries.lock().await;
        Self::purge_if_expired(&mut entries, key, now);
        match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use anyhow::Result;

    fn store() -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::epoch());
        let store = MemoryStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn incr_creates_and_counts() -> Result<()> {
        let (_clock, store) = store();
        assert_eq!(store.incr("rate:a").await?, 1);
        assert_eq!(store.incr("rate:a").await?, 2);
        assert_eq!(store.decr("rate:a").await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn keys_expire_with_clock() -> Result<()> {
        let (clock, store) = store();
        store.incr("rate:a").await?;
        assert!(store.expire("rate:a", Duration::from_secs(60)).await?);
        assert_eq!(store.ttl("rate:a").await?, Some(Duration::from_secs(60)));

        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(store.get("rate:a").await?, None);
        assert_eq!(store.incr("rate:a").await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn expire_on_missing_key_returns_false() -> Result<()> {
        let (_clock, store) = store();
        assert!(!store.expire("missing", Duration::from_secs(1)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn incr_rejects_non_integer() -> Result<()> {
        let (_clock, store) = store();
        store.set("k", "text", None).await?;
        assert_eq!(
            store.incr("k").await,
            Err(StoreError::WrongType("k".to_string()))
        );
        Ok(())
    }

    #[tokio::test]
    async fn push_bounded_keeps_newest() -> Result<()> {
        let (_clock, store) = store();
        for i in 0..5 {
            store.push_bounded("violations:x", &i.to_string(), 3).await?;
        }
        assert_eq!(store.list("violations:x").await?, vec!["4", "3", "2"]);
        Ok(())
    }

    #[tokio::test]
    async fn pattern_operations() -> Result<()> {
        let (_clock, store) = store();
        store.set("banned:ip:1", "a", None).await?;
        store.set("banned:ip:2", "b", None).await?;
        store.set("blacklist:t", "1", None).await?;
        assert_eq!(
            store.keys("banned:ip:*").await?,
            vec!["banned:ip:1", "banned:ip:2"]
        );
        assert_eq!(store.delete_pattern("banned:ip:*").await?, 2);
        assert!(store.exists("blacklist:t").await?);
        Ok(())
    }

    #[tokio::test]
    async fn set_add_reports_new_members() -> Result<()> {
        let (_clock, store) = store();
        assert!(store.set_add("lockout:ip:1", "a@example.com").await?);
        assert!(!store.set_add("lockout:ip:1", "a@example.com").await?);
        assert!(store.set_add("lockout:ip:1", "b@example.com").await?);
        assert_eq!(store.set_members("lockout:ip:1").await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let (_clock, store) = store();
        store.set_available(false);
        assert!(!store.is_available());
        assert_eq!(store.incr("k").await, Err(StoreError::Unavailable));
        assert_eq!(store.get("k").await, Err(StoreError::Unavailable));
    }
}
