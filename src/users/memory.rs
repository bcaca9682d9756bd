use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Identity, UserStore, UserStoreError};

#[derive(Debug)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, Identity>>,
    available: AtomicBool,
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, identity: Identity) {
        self.users.lock().await.insert(identity.user_id, identity);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn guard(&self) -> Result<(), UserStoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(UserStoreError::Unavailable)
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<Identity>, UserStoreError> {
        self.guard()?;
        Ok(self.users.lock().await.get(&user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, UserStoreError> {
        self.guard()?;
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|identity| identity.email == email)
            .cloned())
    }

    async fn save(&self, identity: &Identity) -> Result<(), UserStoreError> {
        self.guard()?;
        self.users
            .lock()
            .await
            .insert(identity.user_id, identity.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};
    use chrono::Utc;

    #[tokio::test]
    async fn finds_by_id_and_email() -> Result<()> {
        let store = MemoryUserStore::new();
        let identity = Identity::new("Bob@Example.com", "user", "hash", Utc::now());
        let id = identity.user_id;
        store.insert(identity).await;

        let found = store
            .find_by_email("bob@example.com")
            .await?
            .context("missing user")?;
        assert_eq!(found.user_id, id);
        assert!(store.find_by_id(id).await?.is_some());
        assert!(store.find_by_email("nobody@example.com").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn outage_is_reported() {
        let store = MemoryUserStore::new();
        store.set_available(false);
        assert_eq!(
            store.find_by_id(Uuid::new_v4()).await,
            Err(UserStoreError::Unavailable)
        );
    }
}
