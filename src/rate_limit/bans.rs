use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::RateLimiter;
use crate::audit::{self, AuditEvent, AuditEventType, ClientInfo};
use crate::clock::after;
use crate::decision::{Denial, DenyReason};
use crate::store::{StoreError, keys};

/// Stored at `banned:ip:<ip>`. `expires_at = None` means permanent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BanRecord {
    pub ip: String,
    pub reason: String,
    pub banned_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl BanRecord {
    #[must_use]
    pub fn denial(&self) -> Denial {
        Denial::new(DenyReason::IpBanned {
            reason: self.reason.clone(),
            expires_at: self.expires_at,
        })
        .with_detail("ip", self.ip.clone())
    }
}

impl RateLimiter {
    /// Ban `ip` for `duration`, or permanently when `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the ban record cannot be written.
    pub async fn ban_ip(
        &self,
        ip: &str,
        reason: &str,
        duration: Option<Duration>,
        actor: &ClientInfo,
    ) -> Result<BanRecord, StoreError> {
        let now = self.clock.now();
        let record = BanRecord {
            ip: ip.to_string(),
            reason: reason.to_string(),
            banned_at: now,
            expires_at: duration.map(|duration| after(now, duration)),
        };
        let value =
            serde_json::to_string(&record).map_err(|err| StoreError::Backend(err.to_string()))?;
        self.store.set(&keys::banned_ip(ip), &value, duration).await?;

        info!(ip, reason, permanent = duration.is_none(), "IP banned");
        audit::emit(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventType::IpBanned, now)
                .client(actor)
                .detail("banned_ip", ip)
                .detail("reason", reason)
                .detail(
                    "expires_at",
                    record.expires_at.map(|at| at.to_rfc3339()),
                ),
        )
        .await;
        Ok(record)
    }

    /// Lift a ban and forget the address's violation history.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the delete.
    pub async fn unban_ip(&self, ip: &str, actor: &ClientInfo) -> Result<bool, StoreError> {
        let removed = self.store.del(&keys::banned_ip(ip)).await?;
        if let Err(err) = self.store.del(&keys::violations(ip)).await {
            warn!("failed to clear violations for {ip}: {err}");
        }
        if removed {
            info!(ip, "IP unbanned");
            audit::emit(
                self.audit.as_ref(),
                AuditEvent::new(AuditEventType::IpUnbanned, self.clock.now())
                    .client(actor)
                    .detail("banned_ip", ip),
            )
            .await;
        }
        Ok(removed)
    }

    /// Current ban for `ip`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn ban_status(&self, ip: &str) -> Result<Option<BanRecord>, StoreError> {
        let Some(value) = self.store.get(&keys::banned_ip(ip)).await? else {
            return Ok(None);
        };
        Ok(Some(self.parse_ban(ip, &value)))
    }

    /// Fail-open ban check.
    pub async fn is_banned(&self, ip: &str) -> bool {
        if !self.store.is_available() {
            return false;
        }
        match self.ban_status(ip).await {
            Ok(ban) => ban.is_some(),
            Err(err) => {
                warn!("ban check failed, allowing: {err}");
                false
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn list_bans(&self) -> Result<Vec<BanRecord>, StoreError> {
        let mut bans = Vec::new();
        for key in self.store.keys(keys::BANNED_IP_PATTERN).await? {
            let ip = key.trim_start_matches("banned:ip:");
            if let Some(value) = self.store.get(&key).await? {
                bans.push(self.parse_ban(ip, &value));
            }
        }
        Ok(bans)
    }

    fn parse_ban(&self, ip: &str, value: &str) -> BanRecord {
        // Records written by other deployments may hold just a reason string.
        serde_json::from_str(value).unwrap_or_else(|_| BanRecord {
            ip: ip.to_string(),
            reason: value.to_string(),
            banned_at: self.clock.now(),
            expires_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::harness;
    use super::super::{RateLimitConfig, RateLimitRule, RequestContext};
    use super::*;
    use crate::store::KeyValueStore;
    use anyhow::{Context, Result};

    #[tokio::test]
    async fn banned_ip_is_rejected_before_counting() -> Result<()> {
        let h = harness(RateLimitConfig::default());
        let admin = ClientInfo::from_ip("127.0.0.1");
        h.limiter
            .ban_ip("203.0.113.5", "scraping", Some(Duration::from_secs(3600)), &admin)
            .await?;

        let ctx = RequestContext::new(ClientInfo::from_ip("203.0.113.5"), "GET", "/");
        let decision = h.limiter.check_request(&ctx, &RateLimitRule::api()).await;
        let denial = decision.denial().context("banned ip must be denied")?;
        assert!(matches!(
            denial.reason(),
            DenyReason::IpBanned { reason, expires_at: Some(_) } if reason == "scraping"
        ));
        assert!(h.store.keys("rate:*").await?.is_empty());
        assert_eq!(h.audit.events_of(AuditEventType::IpBanned).await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn timed_ban_expires_and_permanent_does_not() -> Result<()> {
        let h = harness(RateLimitConfig::default());
        let admin = ClientInfo::default();
        h.limiter
            .ban_ip("10.0.0.1", "timed", Some(Duration::from_secs(60)), &admin)
            .await?;
        h.limiter.ban_ip("10.0.0.2", "forever", None, &admin).await?;
        assert_eq!(h.limiter.list_bans().await?.len(), 2);

        h.clock.advance(chrono::Duration::days(400));
        assert!(!h.limiter.is_banned("10.0.0.1").await);
        assert!(h.limiter.is_banned("10.0.0.2").await);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_ban_duration_clamps_to_far_future() -> Result<()> {
        let h = harness(RateLimitConfig::default());
        let admin = ClientInfo::default();
        let record = h
            .limiter
            .ban_ip("10.0.0.9", "huge", Some(Duration::from_secs(u64::MAX)), &admin)
            .await?;
        let expires_at = record.expires_at.context("timed ban")?;
        assert_eq!(expires_at.timestamp(), 253_402_300_799);

        let stored = h
            .limiter
            .ban_status("10.0.0.9")
            .await?
            .context("ban expected")?;
        assert_eq!(stored.expires_at, Some(expires_at));
        h.clock.advance(chrono::Duration::days(365 * 100));
        assert!(h.limiter.is_banned("10.0.0.9").await);
        Ok(())
    }

    #[tokio::test]
    async fn unban_removes_record_and_audits() -> Result<()> {
        let h = harness(RateLimitConfig::default());
        let admin = ClientInfo::default();
        h.limiter.ban_ip("10.0.0.3", "manual", None, &admin).await?;
        assert!(h.limiter.unban_ip("10.0.0.3", &admin).await?);
        assert!(!h.limiter.unban_ip("10.0.0.3", &admin).await?);
        assert!(!h.limiter.is_banned("10.0.0.3").await);
        assert_eq!(h.audit.events_of(AuditEventType::IpUnbanned).await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn plain_string_ban_records_are_read() -> Result<()> {
        let h = harness(RateLimitConfig::default());
        h.store.set(&keys::banned_ip("10.0.0.4"), "legacy", None).await?;
        let ban = h
            .limiter
            .ban_status("10.0.0.4")
            .await?
            .context("ban expected")?;
        assert_eq!(ban.reason, "legacy");
        assert_eq!(ban.expires_at, None);
        Ok(())
    }
}
