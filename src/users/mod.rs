//! User records consumed by the lockout manager and the password engine.
//!
//! The user store is authoritative: errors from it fail the decision closed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

mod memory;

pub use memory::MemoryUserStore;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: String,
    pub organization_id: Option<Uuid>,
    pub email_verified: bool,
    pub locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
    pub failed_attempts: u32,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub lockout_count: u32,
    /// PHC string.
    pub password_hash: String,
    pub password_last_changed: DateTime<Utc>,
    pub password_expires_at: Option<DateTime<Utc>>,
    pub password_change_required: bool,
    /// Newest first.
    pub previous_password_hashes: Vec<String>,
}

impl Identity {
    /// A verified, unlocked identity with a fresh password.
    #[must_use]
    pub fn new(
        email: &str,
        role: impl Into<String>,
        password_hash: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: Uuid::now_v7(),
            email: normalize_email(email),
            name: None,
            role: role.into(),
            organization_id: None,
            email_verified: true,
            locked: false,
            locked_until: None,
            failed_attempts: 0,
            last_failed_at: None,
            lockout_count: 0,
            password_hash: password_hash.into(),
            password_last_changed: now,
            password_expires_at: None,
            password_change_required: false,
            previous_password_hashes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_organization(mut self, organization_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    #[must_use]
    pub fn with_email_verified(mut self, verified: bool) -> Self {
        self.email_verified = verified;
        self
    }

    /// Locked at `now`: either permanently or until a future instant.
    #[must_use]
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked && self.locked_until.is_none_or(|until| until > now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserStoreError {
    #[error("user store unavailable")]
    Unavailable,
    #[error("user store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<Identity>, UserStoreError>;

    /// `email` is expected to be normalized.
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, UserStoreError>;

    async fn save(&self, identity: &Identity) -> Result<(), UserStoreError>;
}

#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}
