//! Fixed-window rate limiting enforced by the key-value store.
//!
//! Flow Overview:
//! 1) Reject banned addresses before counting.
//! 2) `INCR` the window key; the increment that creates it sets the TTL.
//! 3) On denial, record a violation and evaluate the automatic IP ban tiers.
//!
//! Every store failure fails open: the request is allowed and the outcome is
//! marked degraded.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::audit::{self, AuditEvent, AuditEventType, AuditLog, ClientInfo};
use crate::clock::{Clock, after};
use crate::decision::{Decision, Denial, DenyReason};
use crate::store::{KeyValueStore, keys};

mod bans;
mod violations;

pub use bans::BanRecord;
pub use violations::ViolationRecord;

const DEFAULT_PROGRESSIVE_MULTIPLIER: u32 = 2;
const DEFAULT_PROGRESSIVE_MAX_STEPS: u32 = 4;
const DEFAULT_VIOLATION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_VIOLATION_LIST_MAX: usize = 100;
const DEFAULT_HOURLY_BAN_THRESHOLD: usize = 20;
const DEFAULT_DAILY_BAN_THRESHOLD: usize = 50;
const DEFAULT_HOURLY_BAN_DURATION: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_DAILY_BAN_DURATION: Duration = Duration::from_secs(3 * 24 * 60 * 60);

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    progressive_multiplier: u32,
    progressive_max_steps: u32,
    violation_ttl: Duration,
    violation_list_max: usize,
    hourly_ban_threshold: usize,
    daily_ban_threshold: usize,
    hourly_ban_duration: Duration,
    daily_ban_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            progressive_multiplier: DEFAULT_PROGRESSIVE_MULTIPLIER,
            progressive_max_steps: DEFAULT_PROGRESSIVE_MAX_STEPS,
            violation_ttl: DEFAULT_VIOLATION_TTL,
            violation_list_max: DEFAULT_VIOLATION_LIST_MAX,
            hourly_ban_threshold: DEFAULT_HOURLY_BAN_THRESHOLD,
            daily_ban_threshold: DEFAULT_DAILY_BAN_THRESHOLD,
            hourly_ban_duration: DEFAULT_HOURLY_BAN_DURATION,
            daily_ban_duration: DEFAULT_DAILY_BAN_DURATION,
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn with_progressive_multiplier(mut self, multiplier: u32) -> Self {
        self.progressive_multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn with_progressive_max_steps(mut self, steps: u32) -> Self {
        self.progressive_max_steps = steps;
        self
    }

    #[must_use]
    pub fn with_violation_ttl(mut self, ttl: Duration) -> Self {
        self.violation_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_violation_list_max(mut self, max: usize) -> Self {
        self.violation_list_max = max;
        self
    }

    #[must_use]
    pub fn with_hourly_ban_threshold(mut self, threshold: usize) -> Self {
        self.hourly_ban_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_daily_ban_threshold(mut self, threshold: usize) -> Self {
        self.daily_ban_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_hourly_ban_duration(mut self, duration: Duration) -> Self {
        self.hourly_ban_duration = duration;
        self
    }

    #[must_use]
    pub fn with_daily_ban_duration(mut self, duration: Duration) -> Self {
        self.daily_ban_duration = duration;
        self
    }

    #[must_use]
    pub fn progressive_multiplier(&self) -> u32 {
        self.progressive_multiplier
    }

    #[must_use]
    pub fn progressive_max_steps(&self) -> u32 {
        self.progressive_max_steps
    }

    #[must_use]
    pub fn hourly_ban_threshold(&self) -> usize {
        self.hourly_ban_threshold
    }

    #[must_use]
    pub fn daily_ban_threshold(&self) -> usize {
        self.daily_ban_threshold
    }
}

/// A named limit applied to a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitRule {
    pub scope: String,
    pub window: Duration,
    pub max_requests: u64,
    pub progressive: bool,
    /// Successful requests are released so only failures count.
    pub skip_successful: bool,
    /// Append the authenticated user id to the key.
    pub per_user: bool,
}

impl RateLimitRule {
    #[must_use]
    pub fn new(scope: impl Into<String>, window: Duration, max_requests: u64) -> Self {
        Self {
            scope: scope.into(),
            window,
            max_requests,
            progressive: false,
            skip_successful: false,
            per_user: false,
        }
    }

    /// 60 requests per minute.
    #[must_use]
    pub fn api() -> Self {
        Self::new("api", Duration::from_secs(60), 60)
    }

    /// 5 failed attempts per 15 minutes, growing with each violation.
    #[must_use]
    pub fn auth() -> Self {
        Self::new("auth", Duration::from_secs(15 * 60), 5)
            .progressive()
            .skip_successful()
    }

    /// 3 per hour.
    #[must_use]
    pub fn password_reset() -> Self {
        Self::new("password_reset", Duration::from_secs(60 * 60), 3)
    }

    /// 10 per minute.
    #[must_use]
    pub fn strict() -> Self {
        Self::new("strict", Duration::from_secs(60), 10)
    }

    /// Look up a preset by name.
    #[must_use]
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "api" => Some(Self::api()),
            "auth" => Some(Self::auth()),
            "password_reset" => Some(Self::password_reset()),
            "strict" => Some(Self::strict()),
            _ => None,
        }
    }

    #[must_use]
    pub fn progressive(mut self) -> Self {
        self.progressive = true;
        self
    }

    #[must_use]
    pub fn skip_successful(mut self) -> Self {
        self.skip_successful = true;
        self
    }

    #[must_use]
    pub fn per_user(mut self) -> Self {
        self.per_user = true;
        self
    }

    #[must_use]
    pub fn with_max_requests(mut self, max_requests: u64) -> Self {
        self.max_requests = max_requests;
        self
    }

    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// The request facts a rate-limit key is built from.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub client: ClientInfo,
    pub method: String,
    pub path: String,
    pub user_id: Option<Uuid>,
}

impl RequestContext {
    #[must_use]
    pub fn new(client: ClientInfo, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            client,
            method: method.into(),
            path: path.into(),
            user_id: None,
        }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitOutcome {
    pub key: String,
    pub allowed: bool,
    pub limit: u64,
    pub count: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    pub retry_after_seconds: Option<u64>,
    /// The store could not be consulted and the request was let through.
    pub degraded: bool,
}

impl RateLimitOutcome {
    fn degraded(key: &str, limit: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            allowed: true,
            limit,
            count: 0,
            remaining: limit,
            reset_at,
            retry_after_seconds: None,
            degraded: true,
        }
    }

    /// `X-RateLimit-*` headers, plus `Retry-After` on denial.
    #[must_use]
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("x-ratelimit-limit", self.limit.to_string()),
            ("x-ratelimit-remaining", self.remaining.to_string()),
            ("x-ratelimit-reset", self.reset_at.timestamp().to_string()),
        ];
        if let Some(retry_after) = self.retry_after_seconds {
            headers.push(("retry-after", retry_after.to_string()));
        }
        headers
    }

    #[must_use]
    pub fn denial(&self) -> Denial {
        Denial::new(DenyReason::RateLimited {
            limit: self.limit,
            reset_at: self.reset_at,
            retry_after_seconds: self.retry_after_seconds.unwrap_or(1),
        })
        .with_detail("remaining", self.remaining)
        .with_detail("key", self.key.clone())
    }
}

/// `base × multiplier^min(violations, max_steps)`, saturating.
#[must_use]
pub fn progressive_window(base: Duration, violations: u64, multiplier: u32, max_steps: u32) -> Duration {
    let steps = u32::try_from(violations.min(u64::from(max_steps))).unwrap_or(max_steps);
    base.saturating_mul(multiplier.saturating_pow(steps))
}

pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn KeyValueStore>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(
        config: RateLimitConfig,
        store: Arc<dyn KeyValueStore>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            audit,
            clock,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one request against `key`.
    #[instrument(skip(self))]
    pub async fn check(
        &self,
        key: &str,
        window: Duration,
        max_requests: u64,
        progressive: bool,
    ) -> RateLimitOutcome {
        let now = self.clock.now();
        let degraded_reset = after(now, window);
        if !self.store.is_available() {
            warn!("store unavailable, rate limit degraded to allow");
            return RateLimitOutcome::degraded(key, max_requests, degraded_reset);
        }

        let window = if progressive {
            self.effective_window(key, window).await
        } else {
            window
        };

        let count = match self.store.incr(key).await {
            Ok(count) => u64::try_from(count).unwrap_or(0),
            Err(err) => {
                warn!("rate limit counter failed, allowing: {err}");
                return RateLimitOutcome::degraded(key, max_requests, degraded_reset);
            }
        };

        let ttl = self.window_ttl(key, count, window).await;
        let reset_at = after(now, ttl);
        let allowed = count <= max_requests;
        let retry_after_seconds = if allowed {
            None
        } else {
            if progressive {
                self.bump_violations(key).await;
            }
            Some(ceil_seconds(ttl).max(1))
        };

        debug!(count, max_requests, allowed, "rate limit checked");
        RateLimitOutcome {
            key: key.to_string(),
            allowed,
            limit: max_requests,
            count,
            remaining: max_requests.saturating_sub(count),
            reset_at,
            retry_after_seconds,
            degraded: false,
        }
    }

    /// Undo an allowed request after the wrapped operation succeeded.
    ///
    /// Only the raw counter moves; the progressive violation count is kept.
    pub async fn release(&self, outcome: &RateLimitOutcome) {
        if !outcome.allowed || outcome.degraded || !self.store.is_available() {
            return;
        }
        match self.store.decr(&outcome.key).await {
            Ok(remaining) if remaining <= 0 => {
                if let Err(err) = self.store.del(&outcome.key).await {
                    warn!("failed to clear released rate limit key: {err}");
                }
            }
            Ok(_) => {}
            Err(err) => warn!("failed to release rate limit slot: {err}"),
        }
    }

    /// Full request check: ban first, then the namespaced counter.
    #[instrument(skip_all, fields(scope = %rule.scope, path = %ctx.path))]
    pub async fn check_request(
        &self,
        ctx: &RequestContext,
        rule: &RateLimitRule,
    ) -> Decision<RateLimitOutcome> {
        if let Some(ip) = ctx.client.ip.as_deref() {
            match self.ban_status(ip).await {
                Ok(Some(ban)) => {
                    debug!(ip, "request from banned address");
                    return Decision::Deny(ban.denial());
                }
                Ok(None) => {}
                Err(err) => warn!("ban check failed, allowing: {err}"),
            }
        }

        let user_id = ctx
            .user_id
            .filter(|_| rule.per_user)
            .map(|id| id.to_string());
        let key = keys::rate(
            &rule.scope,
            ctx.client.identifier(),
            &ctx.method,
            &ctx.path,
            user_id.as_deref(),
        );
        let outcome = self
            .check(&key, rule.window, rule.max_requests, rule.progressive)
            .await;
        if outcome.allowed {
            return Decision::Allow(outcome);
        }

        audit::emit(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventType::RateLimitExceeded, self.clock.now())
                .client(&ctx.client)
                .detail("rule", rule.scope.clone())
                .detail("method", ctx.method.clone())
                .detail("path", ctx.path.clone())
                .detail("count", outcome.count)
                .detail("limit", outcome.limit),
        )
        .await;
        self.record_violation(ctx, rule).await;

        Decision::Deny(outcome.denial())
    }

    async fn effective_window(&self, key: &str, base: Duration) -> Duration {
        let violations = match self.store.get(&keys::rate_violations(key)).await {
            Ok(value) => value.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0),
            Err(err) => {
                warn!("failed to read violation count: {err}");
                0
            }
        };
        progressive_window(
            base,
            violations,
            self.config.progressive_multiplier,
            self.config.progressive_max_steps,
        )
    }

    async fn window_ttl(&self, key: &str, count: u64, window: Duration) -> Duration {
        if count == 1 {
            if let Err(err) = self.store.expire(key, window).await {
                warn!("failed to set rate limit window: {err}");
            }
            return window;
        }
        match self.store.ttl(key).await {
            Ok(Some(ttl)) => ttl,
            Ok(None) => {
                // A key without TTL would never reset.
                if let Err(err) = self.store.expire(key, window).await {
                    warn!("failed to repair rate limit window: {err}");
                }
                window
            }
            Err(err) => {
                warn!("failed to read rate limit window: {err}");
                window
            }
        }
    }

    async fn bump_violations(&self, key: &str) {
        let violations_key = keys::rate_violations(key);
        match self.store.incr(&violations_key).await {
            Ok(_) => {
                if let Err(err) = self
                    .store
                    .expire(&violations_key, self.config.violation_ttl)
                    .await
                {
                    warn!("failed to set violation TTL: {err}");
                }
            }
            Err(err) => warn!("failed to record progressive violation: {err}"),
        }
    }
}

fn ceil_seconds(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use anyhow::{Context, Result};

    pub(super) struct Harness {
        pub clock: Arc<ManualClock>,
        pub store: Arc<MemoryStore>,
        pub audit: Arc<MemoryAuditLog>,
        pub limiter: RateLimiter,
    }

    pub(super) fn harness(config: RateLimitConfig) -> Harness {
        let clock = Arc::new(ManualClock::epoch());
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let audit = Arc::new(MemoryAuditLog::new());
        let limiter = RateLimiter::new(config, store.clone(), audit.clone(), clock.clone());
        Harness {
            clock,
            store,
            audit,
            limiter,
        }
    }

    #[tokio::test]
    async fn allows_up_to_max_then_denies() {
        let h = harness(RateLimitConfig::default());
        let window = Duration::from_secs(60);
        for n in 1..=10 {
            let outcome = h.limiter.check("rate:t", window, 10, false).await;
            assert!(outcome.allowed, "request {n} should pass");
            assert_eq!(outcome.remaining, 10 - n);
        }
        let denied = h.limiter.check("rate:t", window, 10, false).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        let retry_after = denied.retry_after_seconds.unwrap_or_default();
        assert!(retry_after > 0 && retry_after <= 60);
    }

    #[tokio::test]
    async fn window_resets_after_ttl() {
        let h = harness(RateLimitConfig::default());
        let window = Duration::from_secs(60);
        for _ in 0..3 {
            h.limiter.check("rate:t", window, 2, false).await;
        }
        h.clock.advance(chrono::Duration::seconds(61));
        let outcome = h.limiter.check("rate:t", window, 2, false).await;
        assert!(outcome.allowed);
        assert_eq!(outcome.count, 1);
    }

    #[tokio::test]
    async fn retry_after_tracks_remaining_window() {
        let h = harness(RateLimitConfig::default());
        let window = Duration::from_secs(60);
        h.limiter.check("rate:t", window, 1, false).await;
        h.clock.advance(chrono::Duration::seconds(45));
        let denied = h.limiter.check("rate:t", window, 1, false).await;
        assert_eq!(denied.retry_after_seconds, Some(15));
        assert_eq!(
            denied.reset_at.timestamp(),
            h.clock.now().timestamp() + 15
        );
    }

    #[test]
    fn progressive_window_plateaus() {
        let base = Duration::from_secs(60);
        assert_eq!(progressive_window(base, 0, 2, 4), base);
        assert_eq!(progressive_window(base, 1, 2, 4), Duration::from_secs(120));
        assert_eq!(progressive_window(base, 4, 2, 4), Duration::from_secs(960));
        for violations in [5, 10, 1_000, u64::MAX] {
            assert_eq!(
                progressive_window(base, violations, 2, 4),
                Duration::from_secs(960)
            );
        }
    }

    #[tokio::test]
    async fn progressive_mode_grows_the_next_window() -> Result<()> {
        let h = harness(RateLimitConfig::default());
        let base = Duration::from_secs(60);
        h.limiter.check("rate:p", base, 1, true).await;
        let denied = h.limiter.check("rate:p", base, 1, true).await;
        assert!(!denied.allowed);
        assert_eq!(
            h.store.get(&keys::rate_violations("rate:p")).await?,
            Some("1".to_string())
        );

        h.clock.advance(chrono::Duration::seconds(61));
        let next = h.limiter.check("rate:p", base, 1, true).await;
        assert!(next.allowed);
        let ttl = h.store.ttl("rate:p").await?.context("window ttl")?;
        assert_eq!(ttl, Duration::from_secs(120));
        Ok(())
    }

    #[tokio::test]
    async fn release_only_touches_raw_counter() -> Result<()> {
        let h = harness(RateLimitConfig::default());
        let base = Duration::from_secs(60);
        h.limiter.check("rate:r", base, 1, true).await;
        h.limiter.check("rate:r", base, 1, true).await;

        h.clock.advance(chrono::Duration::seconds(121));
        let allowed = h.limiter.check("rate:r", base, 1, true).await;
        h.limiter.release(&allowed).await;
        assert_eq!(h.store.get("rate:r").await?, None);
        assert_eq!(
            h.store.get(&keys::rate_violations("rate:r")).await?,
            Some("1".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn store_outage_fails_open() {
        let h = harness(RateLimitConfig::default());
        h.store.set_available(false);
        for _ in 0..5 {
            let outcome = h.limiter.check("rate:t", Duration::from_secs(60), 1, false).await;
            assert!(outcome.allowed);
            assert!(outcome.degraded);
        }
    }

    #[tokio::test]
    async fn sixty_first_request_is_denied_with_headers() -> Result<()> {
        let h = harness(RateLimitConfig::default());
        let ctx = RequestContext::new(ClientInfo::from_ip("198.51.100.7"), "GET", "/v1/items");
        let rule = RateLimitRule::api();
        for n in 1..=60 {
            let decision = h.limiter.check_request(&ctx, &rule).await;
            assert!(decision.is_allowed(), "request {n} should pass");
            h.clock.advance(chrono::Duration::milliseconds(500));
        }
        let decision = h.limiter.check_request(&ctx, &rule).await;
        let denial = decision.denial().context("61st request must be denied")?;
        let DenyReason::RateLimited {
            retry_after_seconds,
            limit,
            ..
        } = denial.reason()
        else {
            anyhow::bail!("unexpected reason {:?}", denial.reason());
        };
        assert_eq!(*limit, 60);
        assert!(*retry_after_seconds > 0 && *retry_after_seconds <= 60);
        assert_eq!(
            denial.details().get("remaining").and_then(serde_json::Value::as_u64),
            Some(0)
        );
        assert_eq!(
            h.audit.events_of(AuditEventType::RateLimitExceeded).await.len(),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn per_user_rule_separates_keys() {
        let h = harness(RateLimitConfig::default());
        let rule = RateLimitRule::strict().with_max_requests(1).per_user();
        let client = ClientInfo::from_ip("10.1.1.1");
        let alice = RequestContext::new(client.clone(), "POST", "/x").with_user(Uuid::new_v4());
        let bob = RequestContext::new(client, "POST", "/x").with_user(Uuid::new_v4());
        assert!(h.limiter.check_request(&alice, &rule).await.is_allowed());
        assert!(h.limiter.check_request(&bob, &rule).await.is_allowed());
        assert!(h.limiter.check_request(&alice, &rule).await.is_denied());
    }

    #[test]
    fn presets_by_name() {
        let auth = RateLimitRule::preset("auth").unwrap_or_else(RateLimitRule::api);
        assert_eq!(auth.max_requests, 5);
        assert!(auth.progressive && auth.skip_successful);
        assert!(RateLimitRule::preset("unknown").is_none());
    }

    #[test]
    fn outcome_headers() {
        let outcome = RateLimitOutcome {
            key: "k".to_string(),
            allowed: false,
            limit: 60,
            count: 61,
            remaining: 0,
            reset_at: DateTime::<Utc>::from_timestamp(1_700_000_060, 0).unwrap_or_default(),
            retry_after_seconds: Some(30),
            degraded: false,
        };
        assert_eq!(
            outcome.headers(),
            vec![
                ("x-ratelimit-limit", "60".to_string()),
                ("x-ratelimit-remaining", "0".to_string()),
                ("x-ratelimit-reset", "1700000060".to_string()),
                ("retry-after", "30".to_string()),
            ]
        );
    }
}
