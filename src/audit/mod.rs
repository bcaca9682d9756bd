//! Security audit events.
//!
//! Every denial, lockout, ban and permission check produces an [`AuditEvent`].
//! The log is append-only; the only query it has to answer is how many events
//! of a type a user produced since a point in time (grace logins).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

mod memory;

pub use memory::MemoryAuditLog;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    LoginSuccess,
    LoginFailure,
    AccountLocked,
    AccountUnlocked,
    TokenValidationFailure,
    TokenRevoked,
    RateLimitExceeded,
    SuspiciousActivity,
    CsrfViolation,
    PasswordChanged,
    PasswordReset,
    PasswordGraceLogin,
    IpBanned,
    IpUnbanned,
    PermissionGranted,
    PermissionDenied,
}

impl AuditEventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginSuccess => "LOGIN_SUCCESS",
            Self::LoginFailure => "LOGIN_FAILURE",
            Self::AccountLocked => "ACCOUNT_LOCKED",
            Self::AccountUnlocked => "ACCOUNT_UNLOCKED",
            Self::TokenValidationFailure => "TOKEN_VALIDATION_FAILURE",
            Self::TokenRevoked => "TOKEN_REVOKED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
            Self::CsrfViolation => "CSRF_VIOLATION",
            Self::PasswordChanged => "PASSWORD_CHANGED",
            Self::PasswordReset => "PASSWORD_RESET",
            Self::PasswordGraceLogin => "PASSWORD_GRACE_LOGIN",
            Self::IpBanned => "IP_BANNED",
            Self::IpUnbanned => "IP_UNBANNED",
            Self::PermissionGranted => "PERMISSION_GRANTED",
            Self::PermissionDenied => "PERMISSION_DENIED",
        }
    }
}

/// Request metadata attached to audit events.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
}

impl ClientInfo {
    #[must_use]
    pub fn from_ip(ip: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Identifier used for per-client keys when no address is known.
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.ip.as_deref().unwrap_or("unknown")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub event_type: AuditEventType,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub details: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(event_type: AuditEventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: None,
            email: None,
            event_type,
            ip_address: None,
            user_agent: None,
            device_id: None,
            details: Map::new(),
            timestamp,
        }
    }

    #[must_use]
    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn client(mut self, client: &ClientInfo) -> Self {
        self.ip_address.clone_from(&client.ip);
        self.user_agent.clone_from(&client.user_agent);
        self.device_id.clone_from(&client.device_id);
        self
    }

    #[must_use]
    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    #[error("audit log unavailable")]
    Unavailable,
    #[error("audit backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Number of `event_type` events for `user_id` at or after `since`.
    async fn count_events(
        &self,
        user_id: Uuid,
        event_type: AuditEventType,
        since: DateTime<Utc>,
    ) -> Result<u64, AuditError>;
}

/// Write an event without letting a sink failure change the decision.
pub(crate) async fn emit(log: &dyn AuditLog, event: AuditEvent) {
    let event_type = event.event_type;
    if let Err(err) = log.record(event).await {
        error!(event_type = event_type.as_str(), "Failed to write audit event: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn event_type_serializes_screaming_snake() -> Result<()> {
        let value = serde_json::to_value(AuditEventType::PasswordGraceLogin)?;
        assert_eq!(value.as_str(), Some("PASSWORD_GRACE_LOGIN"));
        assert_eq!(
            AuditEventType::PasswordGraceLogin.as_str(),
            "PASSWORD_GRACE_LOGIN"
        );
        Ok(())
    }

    #[test]
    fn event_builder_copies_client_metadata() -> Result<()> {
        let client = ClientInfo::from_ip("10.0.0.1").with_user_agent("curl/8");
        let event = AuditEvent::new(AuditEventType::LoginFailure, Utc::now())
            .email("alice@example.com")
            .client(&client)
            .detail("reason", "invalid_credentials");
        assert_eq!(event.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(event.user_agent.as_deref(), Some("curl/8"));
        let reason = event
            .details
            .get("reason")
            .and_then(Value::as_str)
            .context("missing reason")?;
        assert_eq!(reason, "invalid_credentials");
        Ok(())
    }

    #[test]
    fn client_identifier_falls_back() {
        assert_eq!(ClientInfo::default().identifier(), "unknown");
        assert_eq!(ClientInfo::from_ip("1.1.1.1").identifier(), "1.1.1.1");
    }
}
