use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, warn};

use super::{RateLimitRule, RateLimiter, RequestContext};
use crate::audit::ClientInfo;
use crate::store::{StoreError, keys};

/// One entry in `violations:<client>`, newest first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl RateLimiter {
    /// Violations recorded for a client, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn violations(&self, client: &str) -> Result<Vec<ViolationRecord>, StoreError> {
        Ok(self
            .store
            .list(&keys::violations(client))
            .await?
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect())
    }

    pub(super) async fn record_violation(&self, ctx: &RequestContext, rule: &RateLimitRule) {
        let client = ctx.client.identifier();
        let mut details = Map::new();
        details.insert("rule".to_string(), Value::from(rule.scope.clone()));
        details.insert("method".to_string(), Value::from(ctx.method.clone()));
        details.insert("path".to_string(), Value::from(ctx.path.clone()));
        let record = ViolationRecord {
            kind: "rate_limit".to_string(),
            timestamp: self.clock.now(),
            details,
        };
        let Ok(value) = serde_json::to_string(&record) else {
            return;
        };

        let key = keys::violations(client);
        if let Err(err) = self
            .store
            .push_bounded(&key, &value, self.config.violation_list_max)
            .await
        {
            warn!("failed to record violation: {err}");
            return;
        }
        if let Err(err) = self.store.expire(&key, self.config.violation_ttl).await {
            warn!("failed to set violation list TTL: {err}");
        }

        if let Some(ip) = ctx.client.ip.as_deref() {
            self.evaluate_auto_ban(ip).await;
        }
    }

    /// Ban tiers: the 24-hour tier is checked first so the longer ban wins.
    async fn evaluate_auto_ban(&self, ip: &str) {
        let violations = match self.violations(ip).await {
            Ok(violations) => violations,
            Err(err) => {
                warn!("failed to read violations for auto-ban: {err}");
                return;
            }
        };
        let now = self.clock.now();
        let within = |hours: i64| {
            violations
                .iter()
                .filter(|v| v.timestamp > now - chrono::Duration::hours(hours))
                .count()
        };
        let last_hour = within(1);
        let last_day = within(24);

        let (reason, duration) = if last_day >= self.config.daily_ban_threshold {
            (
                format!("automatic: {last_day} rate limit violations in 24 hours"),
                self.config.daily_ban_duration,
            )
        } else if last_hour >= self.config.hourly_ban_threshold {
            (
                format!("automatic: {last_hour} rate limit violations in 1 hour"),
                self.config.hourly_ban_duration,
            )
        } else {
            return;
        };

        if let Err(err) = self
            .ban_ip(ip, &reason, Some(duration), &ClientInfo::default())
            .await
        {
            error!("Failed to place automatic ban on {ip}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::harness;
    use super::super::RateLimitConfig;
    use super::*;
    use crate::audit::AuditEventType;
    use crate::decision::DenyReason;
    use anyhow::{Context, Result};
    use std::time::Duration;

    fn tight_rule() -> RateLimitRule {
        RateLimitRule::new("strict", Duration::from_secs(1), 0)
    }

    #[tokio::test]
    async fn hourly_threshold_bans_for_a_day() -> Result<()> {
        let h = harness(RateLimitConfig::default().with_hourly_ban_threshold(3));
        let ctx = RequestContext::new(ClientInfo::from_ip("192.0.2.10"), "GET", "/a");
        for _ in 0..3 {
            assert!(h.limiter.check_request(&ctx, &tight_rule()).await.is_denied());
            h.clock.advance(chrono::Duration::seconds(2));
        }

        let ban = h
            .limiter
            .ban_status("192.0.2.10")
            .await?
            .context("ban expected")?;
        assert_eq!(
            ban.expires_at,
            Some(ban.banned_at + chrono::Duration::days(1))
        );
        assert_eq!(h.limiter.violations("192.0.2.10").await?.len(), 3);

        let decision = h.limiter.check_request(&ctx, &tight_rule()).await;
        assert!(matches!(
            decision.reason(),
            Some(DenyReason::IpBanned { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn daily_threshold_wins_with_longer_ban() -> Result<()> {
        let h = harness(
            RateLimitConfig::default()
                .with_hourly_ban_threshold(3)
                .with_daily_ban_threshold(3),
        );
        let ctx = RequestContext::new(ClientInfo::from_ip("192.0.2.11"), "GET", "/a");
        for _ in 0..3 {
            h.limiter.check_request(&ctx, &tight_rule()).await;
            h.clock.advance(chrono::Duration::seconds(2));
        }
        let ban = h
            .limiter
            .ban_status("192.0.2.11")
            .await?
            .context("ban expected")?;
        assert_eq!(
            ban.expires_at,
            Some(ban.banned_at + chrono::Duration::days(3))
        );
        Ok(())
    }

    #[tokio::test]
    async fn spread_out_violations_do_not_ban() -> Result<()> {
        let h = harness(RateLimitConfig::default().with_hourly_ban_threshold(3));
        let ctx = RequestContext::new(ClientInfo::from_ip("192.0.2.12"), "GET", "/a");
        for _ in 0..5 {
            h.limiter.check_request(&ctx, &tight_rule()).await;
            h.clock.advance(chrono::Duration::minutes(40));
        }
        assert!(!h.limiter.is_banned("192.0.2.12").await);
        assert_eq!(
            h.audit.events_of(AuditEventType::IpBanned).await.len(),
            0
        );
        Ok(())
    }

    #[tokio::test]
    async fn violation_list_is_bounded() -> Result<()> {
        let h = harness(
            RateLimitConfig::default()
                .with_violation_list_max(2)
                .with_hourly_ban_threshold(100),
        );
        let ctx = RequestContext::new(ClientInfo::from_ip("192.0.2.13"), "GET", "/a");
        for _ in 0..4 {
            h.limiter.check_request(&ctx, &tight_rule()).await;
        }
        let violations = h.limiter.violations("192.0.2.13").await?;
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].kind, "rate_limit");
        Ok(())
    }
}
