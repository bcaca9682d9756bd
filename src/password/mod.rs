//! Password policy: strength, history, minimum age and expiration.
//!
//! ## Flow Overview
//! 1) `change_password` validates strength, then minimum age, then history.
//! 2) The current hash is pushed onto `previous_password_hashes` (newest
//!    first, trimmed to `remember_count`) before the new hash is stored.
//! 3) `enforce_freshness` runs after authentication: an expired password is
//!    let through while grace logins remain, each one recorded as a
//!    `PASSWORD_GRACE_LOGIN` audit event and counted back from the audit log.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::{self, AuditEvent, AuditEventType, AuditLog, ClientInfo};
use crate::clock::{Clock, after, seconds_until};
use crate::decision::{Decision, DenyReason};
use crate::error::{Error, Result};
use crate::users::{Identity, UserStore};

mod generate;
mod hash;
mod strength;

pub use generate::generate_password;
pub use hash::{HashError, Hasher};
pub use strength::{PersonalInfo, StrengthReport, is_common, validate_strength};

#[cfg(test)]
pub(crate) use hash::test_hasher;

const DEFAULT_MIN_LENGTH: usize = 8;
const DEFAULT_MAX_LENGTH: usize = 128;
const DEFAULT_REMEMBER_COUNT: usize = 5;
const DEFAULT_MIN_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_EXPIRATION_DAYS: u32 = 90;
const DEFAULT_GRACE_LOGINS: u32 = 3;
const DEFAULT_GENERATED_LENGTH: usize = 16;

#[derive(Clone, Debug)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
    pub reject_common: bool,
    pub reject_personal_info: bool,
    /// Previous passwords that may not be reused, on top of the current one.
    pub remember_count: usize,
    pub min_age: Duration,
    /// `0` disables expiration.
    pub expiration_days: u32,
    /// `0` disables grace logins.
    pub grace_logins: u32,
    pub generated_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_LENGTH,
            max_length: DEFAULT_MAX_LENGTH,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
            reject_common: true,
            reject_personal_info: true,
            remember_count: DEFAULT_REMEMBER_COUNT,
            min_age: DEFAULT_MIN_AGE,
            expiration_days: DEFAULT_EXPIRATION_DAYS,
            grace_logins: DEFAULT_GRACE_LOGINS,
            generated_length: DEFAULT_GENERATED_LENGTH,
        }
    }
}

impl PasswordPolicy {
    #[must_use]
    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    #[must_use]
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    #[must_use]
    pub fn with_require_uppercase(mut self, required: bool) -> Self {
        self.require_uppercase = required;
        self
    }

    #[must_use]
    pub fn with_require_lowercase(mut self, required: bool) -> Self {
        self.require_lowercase = required;
        self
    }

    #[must_use]
    pub fn with_require_digit(mut self, required: bool) -> Self {
        self.require_digit = required;
        self
    }

    #[must_use]
    pub fn with_require_special(mut self, required: bool) -> Self {
        self.require_special = required;
        self
    }

    #[must_use]
    pub fn with_reject_common(mut self, reject: bool) -> Self {
        self.reject_common = reject;
        self
    }

    #[must_use]
    pub fn with_reject_personal_info(mut self, reject: bool) -> Self {
        self.reject_personal_info = reject;
        self
    }

    #[must_use]
    pub fn with_remember_count(mut self, count: usize) -> Self {
        self.remember_count = count;
        self
    }

    #[must_use]
    pub fn with_min_age(mut self, min_age: Duration) -> Self {
        self.min_age = min_age;
        self
    }

    #[must_use]
    pub fn with_expiration_days(mut self, days: u32) -> Self {
        self.expiration_days = days;
        self
    }

    #[must_use]
    pub fn with_grace_logins(mut self, grace_logins: u32) -> Self {
        self.grace_logins = grace_logins;
        self
    }

    #[must_use]
    pub fn with_generated_length(mut self, length: usize) -> Self {
        self.generated_length = length;
        self
    }

    fn expires_at(&self, changed_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.expiration_days > 0)
            .then(|| after(changed_at, Duration::from_secs(u64::from(self.expiration_days) * 86_400)))
    }
}

/// Derived on every call, never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct PasswordExpirationStatus {
    pub is_expired: bool,
    /// Negative once expired; `None` when expiration is disabled.
    pub days_until_expiration: Option<i64>,
    pub requires_change: bool,
    /// Only set for expired passwords while grace logins are enabled.
    pub grace_logins_remaining: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct PasswordPolicyEngine {
    policy: PasswordPolicy,
    hasher: Hasher,
    users: Arc<dyn UserStore>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
}

impl PasswordPolicyEngine {
    #[must_use]
    pub fn new(
        policy: PasswordPolicy,
        hasher: Hasher,
        users: Arc<dyn UserStore>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policy,
            hasher,
            users,
            audit,
            clock,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    #[must_use]
    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    #[must_use]
    pub fn verify_password(&self, identity: &Identity, password: &str) -> bool {
        self.hasher.verify(password, &identity.password_hash)
    }

    #[must_use]
    pub fn validate_strength(&self, password: &str, info: &PersonalInfo) -> StrengthReport {
        validate_strength(&self.policy, password, info)
    }

    /// Whether `candidate` matches the current password or one of the last
    /// `remember_count` previous ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the user store fails or the user does not exist.
    pub async fn is_in_history(&self, user_id: Uuid, candidate: &str) -> Result<bool> {
        let user = self.load(user_id).await?;
        Ok(self.matches_history(&user, candidate))
    }

    /// Minimum age check, waived while a change is required.
    ///
    /// # Errors
    ///
    /// Returns an error if the user store fails or the user does not exist.
    pub async fn is_change_allowed(&self, user_id: Uuid) -> Result<bool> {
        let user = self.load(user_id).await?;
        Ok(self.too_recent(&user).is_none())
    }

    /// # Errors
    ///
    /// Returns an error if the user store or the audit log fails.
    pub async fn expiration_status(&self, user_id: Uuid) -> Result<PasswordExpirationStatus> {
        let mut user = self.load(user_id).await?;
        self.status_for(&mut user).await
    }

    /// Consume one grace login.
    ///
    /// # Errors
    ///
    /// Returns an error if the audit log rejects the event; grace logins are
    /// counted from it, so a lost event would hand out an extra one.
    pub async fn record_grace_login(&self, user_id: Uuid, client: &ClientInfo) -> Result<()> {
        self.audit
            .record(
                AuditEvent::new(AuditEventType::PasswordGraceLogin, self.clock.now())
                    .user(user_id)
                    .client(client),
            )
            .await?;
        Ok(())
    }

    /// Gate run after a successful authentication.
    ///
    /// # Errors
    ///
    /// Returns an error if the user store or the audit log fails.
    #[instrument(skip(self, client))]
    pub async fn enforce_freshness(
        &self,
        user_id: Uuid,
        client: &ClientInfo,
    ) -> Result<Decision<PasswordExpirationStatus>> {
        let mut user = self.load(user_id).await?;
        let mut status = self.status_for(&mut user).await?;

        if user.password_change_required {
            return Ok(Decision::deny(DenyReason::PasswordChangeRequired));
        }
        if !status.is_expired {
            return Ok(Decision::Allow(status));
        }
        match status.grace_logins_remaining {
            Some(remaining) if remaining > 0 => {
                self.record_grace_login(user_id, client).await?;
                status.grace_logins_remaining = Some(remaining - 1);
                info!(%user_id, remaining = remaining - 1, "grace login used");
                Ok(Decision::Allow(status))
            }
            _ => {
                debug!(%user_id, "password expired, no grace logins left");
                Ok(Decision::deny(DenyReason::PasswordExpired))
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error if the user store fails, the user does not exist or
    /// hashing fails. Policy failures come back as a denial.
    #[instrument(skip(self, new_password, client))]
    pub async fn change_password(
        &self,
        user_id: Uuid,
        new_password: &str,
        client: &ClientInfo,
    ) -> Result<Decision> {
        let mut user = self.load(user_id).await?;

        let report = self.validate_strength(
            new_password,
            &PersonalInfo {
                name: user.name.clone(),
                email: Some(user.email.clone()),
            },
        );
        if !report.valid {
            return Ok(Decision::deny(DenyReason::WeakPassword {
                errors: report.errors,
            }));
        }
        if let Some(retry_after_seconds) = self.too_recent(&user) {
            return Ok(Decision::deny(DenyReason::PasswordTooRecent {
                retry_after_seconds,
            }));
        }
        if self.matches_history(&user, new_password) {
            return Ok(Decision::deny(DenyReason::PasswordReused));
        }

        let hash = self.hasher.hash(new_password)?;
        let now = self.clock.now();
        self.replace_hash(&mut user, hash, now);
        user.password_change_required = false;
        self.users.save(&user).await?;

        info!(%user_id, "password changed");
        audit::emit(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventType::PasswordChanged, now)
                .user(user.user_id)
                .email(user.email.clone())
                .client(client),
        )
        .await;
        Ok(Decision::allow())
    }

    /// Replace the password with a generated one and require a change on
    /// next use. The generated password is returned once.
    ///
    /// # Errors
    ///
    /// Returns an error if the user store fails, the user does not exist or
    /// hashing fails.
    #[instrument(skip(self, actor))]
    pub async fn admin_reset_password(
        &self,
        user_id: Uuid,
        actor: &ClientInfo,
    ) -> Result<SecretString> {
        let mut user = self.load(user_id).await?;
        let password = generate_password(&self.policy, &mut rand::thread_rng());
        let hash = self.hasher.hash(&password)?;
        let now = self.clock.now();
        self.replace_hash(&mut user, hash, now);
        user.password_change_required = true;
        self.users.save(&user).await?;

        info!(%user_id, "password reset by administrator");
        audit::emit(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventType::PasswordReset, now)
                .user(user.user_id)
                .email(user.email.clone())
                .client(actor),
        )
        .await;
        Ok(SecretString::from(password))
    }

    async fn load(&self, user_id: Uuid) -> Result<Identity> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(Error::UnknownUser(user_id))
    }

    /// Every stored hash is verified so a match on the current password costs
    /// the same as a match deep in history.
    fn matches_history(&self, user: &Identity, candidate: &str) -> bool {
        let mut matched = self.hasher.verify(candidate, &user.password_hash);
        for previous in user
            .previous_password_hashes
            .iter()
            .take(self.policy.remember_count)
        {
            matched |= self.hasher.verify(candidate, previous);
        }
        matched
    }

    /// Seconds left before the minimum age is reached, if any.
    fn too_recent(&self, user: &Identity) -> Option<u64> {
        if user.password_change_required || self.policy.min_age.is_zero() {
            return None;
        }
        let allowed_at = after(user.password_last_changed, self.policy.min_age);
        let now = self.clock.now();
        (now < allowed_at).then(|| seconds_until(now, allowed_at).max(1))
    }

    fn replace_hash(&self, user: &mut Identity, hash: String, now: DateTime<Utc>) {
        let previous = std::mem::replace(&mut user.password_hash, hash);
        user.previous_password_hashes.insert(0, previous);
        user.previous_password_hashes
            .truncate(self.policy.remember_count);
        user.password_last_changed = now;
        user.password_expires_at = self.policy.expires_at(now);
    }

    async fn status_for(&self, user: &mut Identity) -> Result<PasswordExpirationStatus> {
        let Some(policy_expiry) = self.policy.expires_at(user.password_last_changed) else {
            return Ok(PasswordExpirationStatus {
                is_expired: false,
                days_until_expiration: None,
                requires_change: user.password_change_required,
                grace_logins_remaining: None,
                expires_at: None,
            });
        };

        let expires_at = match user.password_expires_at {
            Some(at) => at,
            None => {
                user.password_expires_at = Some(policy_expiry);
                self.users.save(user).await?;
                policy_expiry
            }
        };

        let now = self.clock.now();
        let is_expired = now >= expires_at;
        let remaining_secs = expires_at.signed_duration_since(now).num_seconds();
        let days_until_expiration = remaining_secs.div_euclid(86_400)
            + i64::from(remaining_secs.rem_euclid(86_400) > 0);

        let grace_logins_remaining = if is_expired && self.policy.grace_logins > 0 {
            let used = self
                .audit
                .count_events(user.user_id, AuditEventType::PasswordGraceLogin, expires_at)
                .await?;
            let used = u32::try_from(used).unwrap_or(u32::MAX);
            Some(self.policy.grace_logins.saturating_sub(used))
        } else {
            None
        };

        Ok(PasswordExpirationStatus {
            is_expired,
            days_until_expiration: Some(days_until_expiration),
            requires_change: user.password_change_required
                || (is_expired && grace_logins_remaining.unwrap_or(0) == 0),
            grace_logins_remaining,
            expires_at: Some(expires_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::clock::ManualClock;
    use crate::users::MemoryUserStore;
    use anyhow::Context;
    use secrecy::ExposeSecret;

    struct Harness {
        clock: Arc<ManualClock>,
        users: Arc<MemoryUserStore>,
        audit: Arc<MemoryAuditLog>,
        engine: PasswordPolicyEngine,
        user_id: Uuid,
    }

    const INITIAL: &str = "Initial#Pass1";

    async fn harness(policy: PasswordPolicy) -> anyhow::Result<Harness> {
        let clock = Arc::new(ManualClock::epoch());
        let users = Arc::new(MemoryUserStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let hasher = test_hasher();
        let identity = Identity::new("alice@example.com", "user", hasher.hash(INITIAL)?, clock.now())
            .with_name("Alice Liddell");
        let user_id = identity.user_id;
        users.insert(identity).await;
        let engine = PasswordPolicyEngine::new(
            policy,
            hasher,
            users.clone(),
            audit.clone(),
            clock.clone(),
        );
        Ok(Harness {
            clock,
            users,
            audit,
            engine,
            user_id,
        })
    }

    fn client() -> ClientInfo {
        ClientInfo::from_ip("198.51.100.4")
    }

    async fn change(h: &Harness, password: &str) -> anyhow::Result<Decision> {
        Ok(h.engine
            .change_password(h.user_id, password, &client())
            .await?)
    }

    #[tokio::test]
    async fn change_checks_strength_first() -> anyhow::Result<()> {
        let h = harness(PasswordPolicy::default()).await?;
        let decision = change(&h, "weak").await?;
        assert!(matches!(
            decision.reason(),
            Some(DenyReason::WeakPassword { .. })
        ));
        let decision = change(&h, "Alice#Secret99").await?;
        assert!(matches!(
            decision.reason(),
            Some(DenyReason::WeakPassword { errors }) if errors.iter().any(|e| e.contains("name or email"))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn minimum_age_blocks_quick_changes() -> anyhow::Result<()> {
        let h = harness(PasswordPolicy::default()).await?;
        h.clock.advance(chrono::Duration::hours(23));
        assert!(!h.engine.is_change_allowed(h.user_id).await?);
        let decision = change(&h, "Fresh#Start42").await?;
        assert_eq!(
            decision.reason(),
            Some(&DenyReason::PasswordTooRecent {
                retry_after_seconds: 3600
            })
        );

        h.clock.advance(chrono::Duration::hours(1));
        assert!(h.engine.is_change_allowed(h.user_id).await?);
        assert!(change(&h, "Fresh#Start42").await?.is_allowed());
        assert_eq!(
            h.audit.events_of(AuditEventType::PasswordChanged).await.len(),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn history_window_is_exact() -> anyhow::Result<()> {
        let h = harness(
            PasswordPolicy::default()
                .with_remember_count(2)
                .with_min_age(Duration::ZERO),
        )
        .await?;
        for password in ["Second#Pass2", "Third#Pass3", "Fourth#Pass4"] {
            assert!(change(&h, password).await?.is_allowed());
        }
        // current: Fourth, remembered: Third, Second
        for reused in ["Fourth#Pass4", "Third#Pass3", "Second#Pass2"] {
            assert!(h.engine.is_in_history(h.user_id, reused).await?);
            assert_eq!(
                change(&h, reused).await?.reason(),
                Some(&DenyReason::PasswordReused)
            );
        }
        assert!(!h.engine.is_in_history(h.user_id, INITIAL).await?);
        assert!(change(&h, INITIAL).await?.is_allowed());

        let stored = h.users.find_by_id(h.user_id).await?.context("user")?;
        assert_eq!(stored.previous_password_hashes.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn expiry_is_backfilled_and_counted_down() -> anyhow::Result<()> {
        let h = harness(PasswordPolicy::default()).await?;
        h.clock.advance(chrono::Duration::days(80));
        let status = h.engine.expiration_status(h.user_id).await?;
        assert!(!status.is_expired);
        assert_eq!(status.days_until_expiration, Some(10));
        assert_eq!(status.grace_logins_remaining, None);

        let stored = h.users.find_by_id(h.user_id).await?.context("user")?;
        assert_eq!(stored.password_expires_at, status.expires_at);
        Ok(())
    }

    #[tokio::test]
    async fn grace_logins_are_consumed_then_denied() -> anyhow::Result<()> {
        let h = harness(PasswordPolicy::default().with_grace_logins(2)).await?;
        h.clock.advance(chrono::Duration::days(91));

        for expected in [1, 0] {
            let decision = h.engine.enforce_freshness(h.user_id, &client()).await?;
            let status = decision.allowed().context("grace login")?;
            assert!(status.is_expired);
            assert_eq!(status.grace_logins_remaining, Some(expected));
        }
        let decision = h.engine.enforce_freshness(h.user_id, &client()).await?;
        assert_eq!(decision.reason(), Some(&DenyReason::PasswordExpired));
        assert_eq!(
            h.audit.events_of(AuditEventType::PasswordGraceLogin).await.len(),
            2
        );
        Ok(())
    }

    #[tokio::test]
    async fn grace_counting_fails_when_audit_is_down() -> anyhow::Result<()> {
        let h = harness(PasswordPolicy::default()).await?;
        h.clock.advance(chrono::Duration::days(91));
        h.audit.set_available(false);
        assert!(h.engine.enforce_freshness(h.user_id, &client()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn expiration_can_be_disabled() -> anyhow::Result<()> {
        let h = harness(PasswordPolicy::default().with_expiration_days(0)).await?;
        h.clock.advance(chrono::Duration::days(1000));
        let decision = h.engine.enforce_freshness(h.user_id, &client()).await?;
        let status = decision.allowed().context("allowed")?;
        assert!(!status.is_expired);
        assert_eq!(status.expires_at, None);
        Ok(())
    }

    #[tokio::test]
    async fn admin_reset_requires_change_and_bypasses_min_age() -> anyhow::Result<()> {
        let h = harness(PasswordPolicy::default()).await?;
        let generated = h
            .engine
            .admin_reset_password(h.user_id, &ClientInfo::from_ip("127.0.0.1"))
            .await?;

        let stored = h.users.find_by_id(h.user_id).await?.context("user")?;
        assert!(stored.password_change_required);
        assert!(h.engine.verify_password(&stored, generated.expose_secret()));
        assert!(
            h.engine
                .validate_strength(generated.expose_secret(), &PersonalInfo::default())
                .valid
        );

        let decision = h.engine.enforce_freshness(h.user_id, &client()).await?;
        assert_eq!(decision.reason(), Some(&DenyReason::PasswordChangeRequired));

        assert!(h.engine.is_change_allowed(h.user_id).await?);
        assert!(change(&h, "Brand#New2024").await?.is_allowed());
        let stored = h.users.find_by_id(h.user_id).await?.context("user")?;
        assert!(!stored.password_change_required);
        assert_eq!(
            h.audit.events_of(AuditEventType::PasswordReset).await.len(),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn unknown_user_is_an_error() -> anyhow::Result<()> {
        let h = harness(PasswordPolicy::default()).await?;
        let result = h.engine.is_change_allowed(Uuid::now_v7()).await;
        assert!(matches!(result, Err(Error::UnknownUser(_))));
        Ok(())
    }
}
