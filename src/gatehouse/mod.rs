//! The wired service: every component built once and shared.
//!
//! ## Flow Overview
//! - `authorize` runs the request pipeline: rate limit, token, identity,
//!   permission, then password freshness.
//! - `login` runs the login pipeline: rate limit, lockout gate, credentials,
//!   password freshness, then a new token family.
//! - `refresh` rotates a token family; `logout` revokes.
//!
//! Each stage may short-circuit with a denial. Collaborator errors that the
//! decision depends on come back as `Err`.

use std::sync::Arc;

use crate::audit::{AuditLog, MemoryAuditLog};
use crate::clock::{Clock, SystemClock};
use crate::lockout::{LockoutConfig, LockoutManager};
use crate::password::{Hasher, PasswordPolicy, PasswordPolicyEngine};
use crate::permissions::{
    MemoryPermissionStore, PermissionConfig, PermissionEvaluator, PermissionStore,
};
use crate::rate_limit::{RateLimitConfig, RateLimitRule, RateLimiter};
use crate::store::{BoundedStore, KeyValueStore, MemoryStore, StoreConfig};
use crate::token::{TokenConfig, TokenIssuer, TokenValidator};
use crate::users::{MemoryUserStore, UserStore};

mod authorize;
mod login;

pub use authorize::{AccessRequest, Authorized};
pub use login::LoginSuccess;

/// Login attempts per client and window. Kept above the lockout threshold so
/// the account locks before the client is throttled.
const DEFAULT_LOGIN_MAX_REQUESTS: u64 = 10;

pub struct Gatehouse {
    clock: Arc<dyn Clock>,
    users: Arc<dyn UserStore>,
    audit: Arc<dyn AuditLog>,
    tokens: TokenValidator,
    issuer: TokenIssuer,
    rate_limiter: RateLimiter,
    lockout: LockoutManager,
    passwords: PasswordPolicyEngine,
    permissions: PermissionEvaluator,
    login_rule: RateLimitRule,
    api_rule: RateLimitRule,
}

impl Gatehouse {
    #[must_use]
    pub fn builder(tokens: TokenConfig) -> GatehouseBuilder {
        GatehouseBuilder::new(tokens)
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    #[must_use]
    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    #[must_use]
    pub fn audit(&self) -> &Arc<dyn AuditLog> {
        &self.audit
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenValidator {
        &self.tokens
    }

    #[must_use]
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    #[must_use]
    pub fn lockout(&self) -> &LockoutManager {
        &self.lockout
    }

    #[must_use]
    pub fn passwords(&self) -> &PasswordPolicyEngine {
        &self.passwords
    }

    #[must_use]
    pub fn permissions(&self) -> &PermissionEvaluator {
        &self.permissions
    }

    #[must_use]
    pub fn login_rule(&self) -> &RateLimitRule {
        &self.login_rule
    }

    #[must_use]
    pub fn api_rule(&self) -> &RateLimitRule {
        &self.api_rule
    }
}

/// Collaborators default to the in-memory implementations and the system
/// clock; the key-value store is always wrapped in a [`BoundedStore`].
pub struct GatehouseBuilder {
    token_config: TokenConfig,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn KeyValueStore>>,
    store_config: StoreConfig,
    users: Option<Arc<dyn UserStore>>,
    permission_store: Option<Arc<dyn PermissionStore>>,
    audit: Option<Arc<dyn AuditLog>>,
    rate_limit: RateLimitConfig,
    lockout: LockoutConfig,
    password_policy: PasswordPolicy,
    hasher: Hasher,
    permissions: PermissionConfig,
    login_rule: RateLimitRule,
    api_rule: RateLimitRule,
}

impl GatehouseBuilder {
    fn new(token_config: TokenConfig) -> Self {
        Self {
            token_config,
            clock: None,
            store: None,
            store_config: StoreConfig::default(),
            users: None,
            permission_store: None,
            audit: None,
            rate_limit: RateLimitConfig::default(),
            lockout: LockoutConfig::default(),
            password_policy: PasswordPolicy::default(),
            hasher: Hasher::default(),
            permissions: PermissionConfig::default(),
            login_rule: RateLimitRule::auth().with_max_requests(DEFAULT_LOGIN_MAX_REQUESTS),
            api_rule: RateLimitRule::api(),
        }
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn store_config(mut self, config: StoreConfig) -> Self {
        self.store_config = config;
        self
    }

    #[must_use]
    pub fn users(mut self, users: Arc<dyn UserStore>) -> Self {
        self.users = Some(users);
        self
    }

    #[must_use]
    pub fn permission_store(mut self, store: Arc<dyn PermissionStore>) -> Self {
        self.permission_store = Some(store);
        self
    }

    #[must_use]
    pub fn audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    #[must_use]
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    #[must_use]
    pub fn lockout(mut self, config: LockoutConfig) -> Self {
        self.lockout = config;
        self
    }

    #[must_use]
    pub fn password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.password_policy = policy;
        self
    }

    #[must_use]
    pub fn hasher(mut self, hasher: Hasher) -> Self {
        self.hasher = hasher;
        self
    }

    #[must_use]
    pub fn permissions(mut self, config: PermissionConfig) -> Self {
        self.permissions = config;
        self
    }

    #[must_use]
    pub fn login_rule(mut self, rule: RateLimitRule) -> Self {
        self.login_rule = rule;
        self
    }

    #[must_use]
    pub fn api_rule(mut self, rule: RateLimitRule) -> Self {
        self.api_rule = rule;
        self
    }

    #[must_use]
    pub fn build(self) -> Gatehouse {
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let raw_store: Arc<dyn KeyValueStore> = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new(clock.clone())));
        let store: Arc<dyn KeyValueStore> =
            Arc::new(BoundedStore::new(raw_store, &self.store_config));
        let users: Arc<dyn UserStore> = self
            .users
            .unwrap_or_else(|| Arc::new(MemoryUserStore::new()));
        let permission_store: Arc<dyn PermissionStore> = self
            .permission_store
            .unwrap_or_else(|| Arc::new(MemoryPermissionStore::new()));
        let audit: Arc<dyn AuditLog> = self
            .audit
            .unwrap_or_else(|| Arc::new(MemoryAuditLog::new()));

        Gatehouse {
            tokens: TokenValidator::new(
                self.token_config.clone(),
                store.clone(),
                audit.clone(),
                clock.clone(),
            ),
            issuer: TokenIssuer::new(self.token_config, store.clone(), clock.clone()),
            rate_limiter: RateLimiter::new(
                self.rate_limit,
                store.clone(),
                audit.clone(),
                clock.clone(),
            ),
            lockout: LockoutManager::new(
                self.lockout,
                users.clone(),
                store,
                audit.clone(),
                clock.clone(),
            ),
            passwords: PasswordPolicyEngine::new(
                self.password_policy,
                self.hasher,
                users.clone(),
                audit.clone(),
                clock.clone(),
            ),
            permissions: PermissionEvaluator::new(
                self.permissions,
                permission_store,
                audit.clone(),
                clock.clone(),
            ),
            login_rule: self.login_rule,
            api_rule: self.api_rule,
            clock,
            users,
            audit,
        }
    }
}
