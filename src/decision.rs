//! Allow/deny results shared by every check.
//!
//! A [`Denial`] carries the specific reason for logs and audit. What the client
//! is allowed to see depends on the [`DenyKind`]: authentication and
//! authorization denials get a generic message, rate/abuse and policy denials
//! are informative.

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::permissions::PermissionDenial;

#[derive(Clone, Debug, PartialEq)]
pub enum Decision<T = ()> {
    Allow(T),
    Deny(Denial),
}

impl<T> Decision<T> {
    #[must_use]
    pub fn deny(reason: DenyReason) -> Self {
        Self::Deny(Denial::new(reason))
    }

    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    #[must_use]
    pub fn is_denied(&self) -> bool {
        !self.is_allowed()
    }

    #[must_use]
    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Self::Allow(_) => None,
            Self::Deny(denial) => Some(denial),
        }
    }

    #[must_use]
    pub fn reason(&self) -> Option<&DenyReason> {
        self.denial().map(Denial::reason)
    }

    #[must_use]
    pub fn allowed(self) -> Option<T> {
        match self {
            Self::Allow(value) => Some(value),
            Self::Deny(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decision<U> {
        match self {
            Self::Allow(value) => Decision::Allow(f(value)),
            Self::Deny(denial) => Decision::Deny(denial),
        }
    }

    /// Convert into a `Result` so `?` can short-circuit a pipeline.
    ///
    /// # Errors
    /// Returns the denial when the decision is `Deny`.
    pub fn into_result(self) -> Result<T, Denial> {
        match self {
            Self::Allow(value) => Ok(value),
            Self::Deny(denial) => Err(denial),
        }
    }
}

impl Decision<()> {
    #[must_use]
    pub fn allow() -> Self {
        Self::Allow(())
    }
}

/// The error taxonomy used to pick status codes and client messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyKind {
    Authentication,
    Authorization,
    RateAbuse,
    Policy,
    Infrastructure,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DenyReason {
    MissingToken,
    MalformedToken,
    ExpiredToken,
    InvalidSignature,
    InvalidIssuer,
    InvalidAudience,
    RevokedToken,
    SupersededToken,
    WrongTokenType,
    UnknownSubject,
    InvalidCredentials,
    AccountLocked {
        remaining_seconds: Option<u64>,
        unlock_at: Option<String>,
    },
    EmailVerificationRequired,
    Permission(PermissionDenial),
    RateLimited {
        limit: u64,
        reset_at: DateTime<Utc>,
        retry_after_seconds: u64,
    },
    IpBanned {
        reason: String,
        expires_at: Option<DateTime<Utc>>,
    },
    WeakPassword {
        errors: Vec<String>,
    },
    PasswordReused,
    PasswordTooRecent {
        retry_after_seconds: u64,
    },
    PasswordExpired,
    PasswordChangeRequired,
    ServiceUnavailable,
}

impl DenyReason {
    #[must_use]
    pub fn kind(&self) -> DenyKind {
        match self {
            Self::MissingToken
            | Self::MalformedToken
            | Self::ExpiredToken
            | Self::InvalidSignature
            | Self::InvalidIssuer
            | Self::InvalidAudience
            | Self::RevokedToken
            | Self::SupersededToken
            | Self::WrongTokenType
            | Self::UnknownSubject
            | Self::InvalidCredentials => DenyKind::Authentication,
            Self::AccountLocked { .. }
            | Self::EmailVerificationRequired
            | Self::Permission(_) => DenyKind::Authorization,
            Self::RateLimited { .. } | Self::IpBanned { .. } => DenyKind::RateAbuse,
            Self::WeakPassword { .. }
            | Self::PasswordReused
            | Self::PasswordTooRecent { .. }
            | Self::PasswordExpired
            | Self::PasswordChangeRequired => DenyKind::Policy,
            Self::ServiceUnavailable => DenyKind::Infrastructure,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::IpBanned { .. }
            | Self::AccountLocked { .. }
            | Self::EmailVerificationRequired
            | Self::Permission(_)
            | Self::PasswordExpired
            | Self::PasswordChangeRequired => StatusCode::FORBIDDEN,
            Self::WeakPassword { .. } | Self::PasswordReused | Self::PasswordTooRecent { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::ServiceUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Stable machine-readable code, used in audit details and logs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::MalformedToken => "malformed",
            Self::ExpiredToken => "expired",
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidIssuer => "invalid_issuer",
            Self::InvalidAudience => "invalid_audience",
            Self::RevokedToken => "revoked",
            Self::SupersededToken => "superseded",
            Self::WrongTokenType => "wrong_token_type",
            Self::UnknownSubject => "unknown_subject",
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountLocked { .. } => "account_locked",
            Self::EmailVerificationRequired => "email_verification_required",
            Self::Permission(denial) => denial.code(),
            Self::RateLimited { .. } => "rate_limited",
            Self::IpBanned { .. } => "ip_banned",
            Self::WeakPassword { .. } => "weak_password",
            Self::PasswordReused => "password_reused",
            Self::PasswordTooRecent { .. } => "password_too_recent",
            Self::PasswordExpired => "password_expired",
            Self::PasswordChangeRequired => "password_change_required",
            Self::ServiceUnavailable => "service_unavailable",
        }
    }

    /// Message safe to return to the client.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidCredentials => "Invalid email or password".to_string(),
            Self::AccountLocked {
                unlock_at: Some(unlock_at),
                ..
            } => format!("Account is locked until {unlock_at}"),
            Self::AccountLocked { .. } => "Account is locked".to_string(),
            Self::EmailVerificationRequired => "Email verification required".to_string(),
            Self::Permission(_) => "Insufficient permissions".to_string(),
            Self::RateLimited {
                retry_after_seconds,
                ..
            } => format!("Too many requests, retry after {retry_after_seconds} seconds"),
            Self::IpBanned { reason, .. } => format!("Access from this address is banned: {reason}"),
            Self::WeakPassword { errors } => errors.join("; "),
            Self::PasswordReused => "Password was used recently".to_string(),
            Self::PasswordTooRecent {
                retry_after_seconds,
            } => format!("Password was changed recently, retry in {retry_after_seconds} seconds"),
            Self::PasswordExpired => "Password has expired and must be reset".to_string(),
            Self::PasswordChangeRequired => "Password change required".to_string(),
            Self::ServiceUnavailable => "Internal server error".to_string(),
            _ => "Authentication required".to_string(),
        }
    }

    /// Seconds the client should wait, when the reason implies a backoff.
    #[must_use]
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_seconds,
                ..
            }
            | Self::PasswordTooRecent {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            Self::AccountLocked {
                remaining_seconds, ..
            } => *remaining_seconds,
            Self::IpBanned {
                expires_at: Some(expires_at),
                ..
            } => u64::try_from(expires_at.signed_duration_since(Utc::now()).num_seconds()).ok(),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Denial {
    reason: DenyReason,
    details: Map<String, Value>,
}

impl Denial {
    #[must_use]
    pub fn new(reason: DenyReason) -> Self {
        Self {
            reason,
            details: Map::new(),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn reason(&self) -> &DenyReason {
        &self.reason
    }

    #[must_use]
    pub fn details(&self) -> &Map<String, Value> {
        &self.details
    }

    #[must_use]
    pub fn kind(&self) -> DenyKind {
        self.reason.kind()
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.reason.status()
    }
}

impl From<DenyReason> for Denial {
    fn from(reason: DenyReason) -> Self {
        Self::new(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_denials_are_generic() {
        let reason = DenyReason::SupersededToken;
        assert_eq!(reason.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(reason.kind(), DenyKind::Authentication);
        assert_eq!(reason.public_message(), "Authentication required");
        assert_eq!(reason.code(), "superseded");
    }

    #[test]
    fn permission_denials_hide_specific_reason() {
        let reason = DenyReason::Permission(PermissionDenial::OwnershipMismatch);
        assert_eq!(reason.status(), StatusCode::FORBIDDEN);
        assert_eq!(reason.public_message(), "Insufficient permissions");
        assert_eq!(reason.code(), "ownership_mismatch");
    }

    #[test]
    fn rate_limit_denials_are_informative() {
        let reason = DenyReason::RateLimited {
            limit: 60,
            reset_at: Utc::now(),
            retry_after_seconds: 42,
        };
        assert_eq!(reason.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(reason.retry_after(), Some(42));
        assert!(reason.public_message().contains("42"));
    }

    #[test]
    fn policy_denials_return_errors() {
        let reason = DenyReason::WeakPassword {
            errors: vec!["too short".to_string(), "needs a digit".to_string()],
        };
        assert_eq!(reason.status(), StatusCode::BAD_REQUEST);
        assert_eq!(reason.public_message(), "too short; needs a digit");
    }

    #[test]
    fn decision_helpers() {
        let allowed: Decision<u8> = Decision::Allow(7);
        assert!(allowed.is_allowed());
        assert_eq!(allowed.clone().map(|v| v + 1).allowed(), Some(8));

        let denied: Decision<u8> = Decision::deny(DenyReason::ExpiredToken);
        assert!(denied.is_denied());
        assert_eq!(denied.reason(), Some(&DenyReason::ExpiredToken));
        assert!(denied.into_result().is_err());
    }
}
