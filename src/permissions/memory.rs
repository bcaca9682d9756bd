use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Permission, PermissionStore, Role, UserPermission};
use crate::users::UserStoreError;

#[derive(Debug)]
pub struct MemoryPermissionStore {
    roles: Mutex<HashMap<String, Role>>,
    overrides: Mutex<HashMap<Uuid, Vec<UserPermission>>>,
    available: AtomicBool,
    lookups: AtomicUsize,
}

impl Default for MemoryPermissionStore {
    fn default() -> Self {
        Self {
            roles: Mutex::new(HashMap::new()),
            overrides: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            lookups: AtomicUsize::new(0),
        }
    }
}

impl MemoryPermissionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_role(&self, role: Role) {
        self.roles.lock().await.insert(role.name.clone(), role);
    }

    pub async fn add_user_permission(&self, user_id: Uuid, permission: UserPermission) {
        self.overrides
            .lock()
            .await
            .entry(user_id)
            .or_default()
            .push(permission);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of lookups served so far.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn guard(&self) -> Result<(), UserStoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(UserStoreError::Unavailable)
        }
    }
}

#[async_trait]
impl PermissionStore for MemoryPermissionStore {
    async fn role_permissions(&self, role: &str) -> Result<Vec<Permission>, UserStoreError> {
        self.guard()?;
        Ok(self
            .roles
            .lock()
            .await
            .get(role)
            .map(|role| role.permissions.clone())
            .unwrap_or_default())
    }

    async fn user_permissions(&self, user_id: Uuid) -> Result<Vec<UserPermission>, UserStoreError> {
        self.guard()?;
        Ok(self
            .overrides
            .lock()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}
