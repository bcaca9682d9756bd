#![allow(dead_code)]

use gatehouse::{
    Gatehouse,
    audit::{ClientInfo, MemoryAuditLog},
    clock::{Clock, ManualClock},
    password::{Hasher, PasswordPolicy},
    permissions::{MemoryPermissionStore, Permission, Role},
    store::MemoryStore,
    token::TokenConfig,
    users::{Identity, MemoryUserStore},
};
use secrecy::SecretString;
use std::sync::Arc;

pub const PASSWORD: &str = "Correct#Horse9";
pub const SECRET: &str = "integration-signing-secret-0123456789";

pub struct TestContext {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub users: Arc<MemoryUserStore>,
    pub permissions: Arc<MemoryPermissionStore>,
    pub audit: Arc<MemoryAuditLog>,
    pub hasher: Hasher,
    pub gatehouse: Arc<Gatehouse>,
}

impl TestContext {
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_policy(PasswordPolicy::default()).await
    }

    pub async fn with_policy(policy: PasswordPolicy) -> anyhow::Result<Self> {
        let clock = Arc::new(ManualClock::epoch());
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let users = Arc::new(MemoryUserStore::new());
        let permissions = Arc::new(MemoryPermissionStore::new());
        permissions
            .add_role(Role::new("user").with_permission(Permission::new("read", "metadata")))
            .await;
        let audit = Arc::new(MemoryAuditLog::new());
        // Cheap parameters keep the suite fast.
        let hasher = Hasher::with_params(8, 1, 1)?;

        let gatehouse = Gatehouse::builder(
            TokenConfig::new(SecretString::from(SECRET)).with_cookie_secure(false),
        )
        .clock(clock.clone())
        .store(store.clone())
        .users(users.clone())
        .permission_store(permissions.clone())
        .audit(audit.clone())
        .hasher(hasher.clone())
        .password_policy(policy)
        .build();

        Ok(Self {
            clock,
            store,
            users,
            permissions,
            audit,
            hasher,
            gatehouse: Arc::new(gatehouse),
        })
    }

    pub async fn add_user(&self, email: &str, role: &str) -> anyhow::Result<Identity> {
        let identity = Identity::new(email, role, self.hasher.hash(PASSWORD)?, self.clock.now());
        self.users.insert(identity.clone()).await;
        Ok(identity)
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(chrono::Duration::minutes(minutes));
    }
}

pub fn client(ip: &str) -> ClientInfo {
    ClientInfo::from_ip(ip).with_user_agent("integration-tests")
}
