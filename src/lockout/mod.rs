//! Account lockout with escalating durations.
//!
//! `UNLOCKED → (failed_attempts ≥ max_attempts) → LOCKED(until) → UNLOCKED`.
//! Locks are never swept; an expired lock is cleared on the next status check.
//! `lockout_count` only ever grows, so each full lockout cycle lasts longer
//! than the previous one.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::audit::{self, AuditEvent, AuditEventType, AuditLog, ClientInfo};
use crate::clock::{Clock, after, seconds_until, to_chrono};
use crate::decision::{Decision, DenyReason};
use crate::error::Result;
use crate::store::{KeyValueStore, keys};
use crate::users::{Identity, UserStore, normalize_email};

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_RESET_WINDOW: Duration = Duration::from_secs(15 * 60);
const DEFAULT_BASE_DURATION: Duration = Duration::from_secs(15 * 60);
const DEFAULT_MULTIPLIER: u32 = 2;
const DEFAULT_MAX_STEPS: u32 = 4;
const DEFAULT_SUSPICIOUS_IP_THRESHOLD: usize = 3;
const DEFAULT_IP_TRACKING_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Clone, Debug)]
pub struct LockoutConfig {
    max_attempts: u32,
    reset_window: Duration,
    base_duration: Duration,
    multiplier: u32,
    max_steps: u32,
    suspicious_ip_threshold: usize,
    ip_tracking_window: Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            reset_window: DEFAULT_RESET_WINDOW,
            base_duration: DEFAULT_BASE_DURATION,
            multiplier: DEFAULT_MULTIPLIER,
            max_steps: DEFAULT_MAX_STEPS,
            suspicious_ip_threshold: DEFAULT_SUSPICIOUS_IP_THRESHOLD,
            ip_tracking_window: DEFAULT_IP_TRACKING_WINDOW,
        }
    }
}

impl LockoutConfig {
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_reset_window(mut self, window: Duration) -> Self {
        self.reset_window = window;
        self
    }

    #[must_use]
    pub fn with_base_duration(mut self, duration: Duration) -> Self {
        self.base_duration = duration;
        self
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn with_max_steps(mut self, steps: u32) -> Self {
        self.max_steps = steps;
        self
    }

    #[must_use]
    pub fn with_suspicious_ip_threshold(mut self, threshold: usize) -> Self {
        self.suspicious_ip_threshold = threshold;
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn reset_window(&self) -> Duration {
        self.reset_window
    }

    /// `base × multiplier^min(lockout_count, max_steps)`.
    #[must_use]
    pub fn lockout_duration(&self, lockout_count: u32) -> Duration {
        let steps = lockout_count.min(self.max_steps);
        self.base_duration
            .saturating_mul(self.multiplier.saturating_pow(steps))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockoutOutcome {
    pub attempts: u32,
    pub remaining_attempts: u32,
    pub locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
    pub lockout_duration: Option<Duration>,
}

pub struct LockoutManager {
    config: LockoutConfig,
    users: Arc<dyn UserStore>,
    store: Arc<dyn KeyValueStore>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
}

impl LockoutManager {
    #[must_use]
    pub fn new(
        config: LockoutConfig,
        users: Arc<dyn UserStore>,
        store: Arc<dyn KeyValueStore>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            users,
            store,
            audit,
            clock,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    /// Count a failed login for `email` and lock once the threshold is hit.
    ///
    /// Unknown emails are counted in the store so the caller cannot tell them
    /// apart from real accounts.
    ///
    /// # Errors
    ///
    /// Returns an error if the user store fails.
    #[instrument(skip(self, client))]
    pub async fn record_failed_attempt(
        &self,
        email: &str,
        client: &ClientInfo,
    ) -> Result<LockoutOutcome> {
        let email = normalize_email(email);
        let Some(mut user) = self.users.find_by_email(&email).await? else {
            return Ok(self.record_unknown(&email).await);
        };

        let now = self.clock.now();
        if user.is_locked_at(now) {
            return Ok(self.outcome(&user));
        }

        let window = to_chrono(self.config.reset_window);
        user.failed_attempts = match user.last_failed_at {
            Some(last) if now.signed_duration_since(last) < window => {
                user.failed_attempts.saturating_add(1)
            }
            _ => 1,
        };
        user.last_failed_at = Some(now);

        if user.failed_attempts < self.config.max_attempts {
            self.users.save(&user).await?;
            debug!(attempts = user.failed_attempts, "failed attempt recorded");
            return Ok(self.outcome(&user));
        }

        let duration = self.config.lockout_duration(user.lockout_count);
        user.locked = true;
        user.locked_until = Some(after(now, duration));
        user.lockout_count = user.lockout_count.saturating_add(1);
        self.users.save(&user).await?;

        info!(
            user_id = %user.user_id,
            lockout_count = user.lockout_count,
            duration_seconds = duration.as_secs(),
            "account locked"
        );
        audit::emit(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventType::AccountLocked, now)
                .user(user.user_id)
                .email(user.email.clone())
                .client(client)
                .detail("attempts", user.failed_attempts)
                .detail("lockout_count", user.lockout_count)
                .detail("duration_seconds", duration.as_secs())
                .detail(
                    "locked_until",
                    user.locked_until.map(|until| until.to_rfc3339()),
                ),
        )
        .await;

        if let Some(ip) = client.ip.as_deref() {
            self.track_ip(ip, &user.email, client).await;
        }

        Ok(self.outcome(&user))
    }

    /// Gate run before credentials are checked.
    ///
    /// An expired lock is cleared here; `failed_attempts` is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the user store fails.
    #[instrument(skip(self, client))]
    pub async fn check_account_status(&self, email: &str, client: &ClientInfo) -> Result<Decision> {
        let email = normalize_email(email);
        let Some(mut user) = self.users.find_by_email(&email).await? else {
            return Ok(self.check_unknown(&email).await);
        };
        if !user.locked {
            return Ok(Decision::allow());
        }

        let now = self.clock.now();
        match user.locked_until {
            None => Ok(Decision::deny(DenyReason::AccountLocked {
                remaining_seconds: None,
                unlock_at: None,
            })),
            Some(until) if until > now => Ok(Decision::deny(DenyReason::AccountLocked {
                remaining_seconds: Some(seconds_until(now, until).max(1)),
                unlock_at: Some(human_time(until)),
            })),
            Some(_) => {
                user.locked = false;
                user.locked_until = None;
                self.users.save(&user).await?;
                info!(user_id = %user.user_id, "lock expired, account unlocked");
                audit::emit(
                    self.audit.as_ref(),
                    AuditEvent::new(AuditEventType::AccountUnlocked, now)
                        .user(user.user_id)
                        .email(user.email.clone())
                        .client(client)
                        .detail("reason", "expired"),
                )
                .await;
                Ok(Decision::allow())
            }
        }
    }

    /// Called on successful authentication. `lockout_count` is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the user store fails.
    pub async fn reset_failed_attempts(&self, email: &str) -> Result<()> {
        let email = normalize_email(email);
        match self.users.find_by_email(&email).await? {
            Some(mut user) => {
                clear_lock(&mut user);
                self.users.save(&user).await?;
            }
            None => {
                if let Err(err) = self.store.del(&keys::lockout_count(&email)).await {
                    warn!("failed to clear attempt counter: {err}");
                }
            }
        }
        Ok(())
    }

    /// Administrative unlock. Returns `false` for unknown accounts.
    ///
    /// # Errors
    ///
    /// Returns an error if the user store fails.
    pub async fn unlock_account(&self, email: &str, actor: &ClientInfo) -> Result<bool> {
        let email = normalize_email(email);
        let Some(mut user) = self.users.find_by_email(&email).await? else {
            return Ok(false);
        };
        clear_lock(&mut user);
        self.users.save(&user).await?;
        info!(user_id = %user.user_id, "account unlocked by administrator");
        audit::emit(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventType::AccountUnlocked, self.clock.now())
                .user(user.user_id)
                .email(user.email.clone())
                .client(actor)
                .detail("reason", "admin"),
        )
        .await;
        Ok(true)
    }

    /// Administrative lock; `until = None` locks permanently.
    ///
    /// # Errors
    ///
    /// Returns an error if the user store fails.
    pub async fn lock_account(
        &self,
        email: &str,
        until: Option<DateTime<Utc>>,
        actor: &ClientInfo,
    ) -> Result<bool> {
        let email = normalize_email(email);
        let Some(mut user) = self.users.find_by_email(&email).await? else {
            return Ok(false);
        };
        user.locked = true;
        user.locked_until = until;
        self.users.save(&user).await?;
        audit::emit(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventType::AccountLocked, self.clock.now())
                .user(user.user_id)
                .email(user.email.clone())
                .client(actor)
                .detail("reason", "admin")
                .detail("locked_until", until.map(|at| at.to_rfc3339())),
        )
        .await;
        Ok(true)
    }

    fn outcome(&self, user: &Identity) -> LockoutOutcome {
        let locked = user.is_locked_at(self.clock.now());
        LockoutOutcome {
            attempts: user.failed_attempts,
            remaining_attempts: self.config.max_attempts.saturating_sub(user.failed_attempts),
            locked,
            locked_until: user.locked_until.filter(|_| locked),
            lockout_duration: user
                .locked_until
                .filter(|_| locked)
                .map(|until| {
                    until
                        .signed_duration_since(self.clock.now())
                        .to_std()
                        .unwrap_or_default()
                }),
        }
    }

    async fn record_unknown(&self, email: &str) -> LockoutOutcome {
        let key = keys::lockout_count(email);
        let attempts = match self.store.incr(&key).await {
            Ok(count) => {
                if count == 1
                    && let Err(err) = self.store.expire(&key, self.config.reset_window).await
                {
                    warn!("failed to set attempt counter TTL: {err}");
                }
                u32::try_from(count).unwrap_or(u32::MAX)
            }
            Err(err) => {
                warn!("failed to count attempt for unknown account: {err}");
                1
            }
        };
        let locked = attempts >= self.config.max_attempts;
        let locked_until = if locked {
            Some(after(self.clock.now(), self.config.reset_window))
        } else {
            None
        };
        LockoutOutcome {
            attempts,
            remaining_attempts: self.config.max_attempts.saturating_sub(attempts),
            locked,
            locked_until,
            lockout_duration: locked.then_some(self.config.reset_window),
        }
    }

    async fn check_unknown(&self, email: &str) -> Decision {
        if !self.store.is_available() {
            return Decision::allow();
        }
        let key = keys::lockout_count(email);
        let count = match self.store.get(&key).await {
            Ok(value) => value.and_then(|v| v.parse::<u32>().ok()).unwrap_or(0),
            Err(err) => {
                warn!("failed to read attempt counter: {err}");
                0
            }
        };
        if count < self.config.max_attempts {
            return Decision::allow();
        }
        let remaining = match self.store.ttl(&key).await {
            Ok(Some(ttl)) => ttl,
            _ => self.config.reset_window,
        };
        let until = after(self.clock.now(), remaining);
        Decision::deny(DenyReason::AccountLocked {
            remaining_seconds: Some(remaining.as_secs().max(1)),
            unlock_at: Some(human_time(until)),
        })
    }

    async fn track_ip(&self, ip: &str, email: &str, client: &ClientInfo) {
        if !self.store.is_available() {
            return;
        }
        let key = keys::lockout_ip(ip);
        let added = match self.store.set_add(&key, email).await {
            Ok(added) => added,
            Err(err) => {
                warn!("failed to track locking address: {err}");
                return;
            }
        };
        if let Err(err) = self.store.expire(&key, self.config.ip_tracking_window).await {
            warn!("failed to set address tracking TTL: {err}");
        }
        if !added {
            return;
        }
        let accounts = match self.store.set_members(&key).await {
            Ok(members) => members,
            Err(err) => {
                warn!("failed to read locked accounts for address: {err}");
                return;
            }
        };
        if accounts.len() >= self.config.suspicious_ip_threshold {
            warn!(ip, accounts = accounts.len(), "possible credential stuffing");
            audit::emit(
                self.audit.as_ref(),
                AuditEvent::new(AuditEventType::SuspiciousActivity, self.clock.now())
                    .client(client)
                    .detail("kind", "credential_stuffing")
                    .detail("locked_accounts", accounts.len())
                    .detail("accounts", accounts),
            )
            .await;
        }
    }
}

fn clear_lock(user: &mut Identity) {
    user.failed_attempts = 0;
    user.last_failed_at = None;
    user.locked = false;
    user.locked_until = None;
}

fn human_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
