use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Gatehouse;
use crate::audit::{self, AuditEvent, AuditEventType, ClientInfo};
use crate::decision::{Decision, Denial, DenyReason};
use crate::error::Result;
use crate::lockout::LockoutOutcome;
use crate::password::PasswordExpirationStatus;
use crate::rate_limit::{RateLimitOutcome, RequestContext};
use crate::token::{TokenPair, jwt};
use crate::users::{Identity, normalize_email};

const LOGIN_PATH: &str = "/v1/auth/login";
const CHANGE_PASSWORD_PATH: &str = "/v1/password/change";

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct LoginSuccess {
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub password: PasswordExpirationStatus,
}

impl Gatehouse {
    /// Login pipeline: rate limit, lockout gate, credentials, password
    /// freshness, then a new token family.
    ///
    /// # Errors
    ///
    /// Returns an error if the user store, the audit log or token signing
    /// fails.
    #[instrument(skip(self, password, client))]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<Decision<LoginSuccess>> {
        let email = normalize_email(email);
        let (identity, slot) = match self
            .check_credentials(&email, password, client, LOGIN_PATH)
            .await?
        {
            Decision::Allow(found) => found,
            Decision::Deny(denial) => return Ok(Decision::Deny(denial)),
        };

        if !identity.email_verified {
            self.login_failed(&email, Some(identity.user_id), client, "email_not_verified")
                .await;
            return Ok(Decision::deny(DenyReason::EmailVerificationRequired));
        }

        let status = match self
            .passwords
            .enforce_freshness(identity.user_id, client)
            .await?
        {
            Decision::Allow(status) => status,
            Decision::Deny(denial) => {
                self.login_failed(&email, Some(identity.user_id), client, denial.reason().code())
                    .await;
                return Ok(Decision::Deny(denial));
            }
        };

        let tokens = self.issuer.issue_pair(&identity).await?;
        self.release(slot).await;

        info!(user_id = %identity.user_id, "login succeeded");
        audit::emit(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventType::LoginSuccess, self.clock.now())
                .user(identity.user_id)
                .email(identity.email.clone())
                .client(client)
                .detail("grace_logins_remaining", status.grace_logins_remaining),
        )
        .await;

        Ok(Decision::Allow(LoginSuccess {
            user_id: identity.user_id,
            email: identity.email,
            role: identity.role,
            tokens,
            password: status,
        }))
    }

    /// Exchange a refresh token for a new pair in the same family.
    ///
    /// Replaying a superseded member revokes the whole family.
    ///
    /// # Errors
    ///
    /// Returns an error if the user store or token signing fails.
    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: &ClientInfo,
    ) -> Result<Decision<TokenPair>> {
        let claims = match self.tokens.validate_refresh(refresh_token, client).await {
            Decision::Allow(claims) => claims,
            Decision::Deny(denial) => {
                if *denial.reason() == DenyReason::SupersededToken {
                    self.revoke_family_of(refresh_token).await;
                }
                return Ok(Decision::Deny(denial));
            }
        };
        let Some(family) = claims.family.as_deref() else {
            return Ok(Decision::deny(DenyReason::MalformedToken));
        };

        let Some(identity) = self.users.find_by_id(claims.subject_id).await? else {
            return Ok(Decision::deny(DenyReason::UnknownSubject));
        };
        if identity.is_locked_at(self.clock.now()) {
            return Ok(Decision::deny(DenyReason::AccountLocked {
                remaining_seconds: None,
                unlock_at: None,
            }));
        }

        let pair = self.issuer.rotate(&identity, family).await?;
        debug!(user_id = %identity.user_id, "refresh token rotated");
        Ok(Decision::Allow(pair))
    }

    /// Revoke the access token and, when given, the refresh token's family.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the revocation.
    #[instrument(skip_all)]
    pub async fn logout(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        client: &ClientInfo,
    ) -> Result<bool> {
        let mut revoked = self.tokens.revoke(access_token, client).await?;
        if let Some(refresh_token) = refresh_token {
            revoked |= self.tokens.revoke(refresh_token, client).await?;
            if let Ok(claims) = jwt::decode_unverified(refresh_token)
                && let Some(family) = claims.family.as_deref()
            {
                self.tokens.revoke_family(family).await?;
            }
        }
        Ok(revoked)
    }

    /// Password change authenticated by the current password, so it works
    /// while a change is required and no token can be issued.
    ///
    /// # Errors
    ///
    /// Returns an error if the user store fails or hashing fails.
    #[instrument(skip(self, current_password, new_password, client))]
    pub async fn change_password(
        &self,
        email: &str,
        current_password: &str,
        new_password: &str,
        client: &ClientInfo,
    ) -> Result<Decision> {
        let email = normalize_email(email);
        let (identity, slot) = match self
            .check_credentials(&email, current_password, client, CHANGE_PASSWORD_PATH)
            .await?
        {
            Decision::Allow(found) => found,
            Decision::Deny(denial) => return Ok(Decision::Deny(denial)),
        };
        self.release(slot).await;
        self.passwords
            .change_password(identity.user_id, new_password, client)
            .await
    }

    /// Rate limit, lockout gate and password check shared by every flow that
    /// authenticates with a password.
    async fn check_credentials(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
        path: &str,
    ) -> Result<Decision<(Identity, RateLimitOutcome)>> {
        let ctx = RequestContext::new(client.clone(), "POST", path);
        let slot = match self.rate_limiter.check_request(&ctx, &self.login_rule).await {
            Decision::Allow(outcome) => outcome,
            Decision::Deny(denial) => {
                self.login_failed(email, None, client, denial.reason().code())
                    .await;
                return Ok(Decision::Deny(denial));
            }
        };

        if let Decision::Deny(denial) = self.lockout.check_account_status(email, client).await? {
            self.login_failed(email, None, client, denial.reason().code())
                .await;
            return Ok(Decision::Deny(denial));
        }

        let identity = self.users.find_by_email(email).await?;
        let verified = match identity.as_ref() {
            Some(identity) => self.passwords.verify_password(identity, password),
            None => {
                self.passwords.hasher().verify_dummy(password);
                false
            }
        };
        let Some(identity) = identity.filter(|_| verified) else {
            let outcome = self.lockout.record_failed_attempt(email, client).await?;
            self.login_failed(email, None, client, "invalid_credentials")
                .await;
            return Ok(Decision::Deny(failed_login_denial(&outcome)));
        };

        self.lockout.reset_failed_attempts(email).await?;
        Ok(Decision::Allow((identity, slot)))
    }

    async fn release(&self, slot: RateLimitOutcome) {
        if self.login_rule.skip_successful {
            self.rate_limiter.release(&slot).await;
        }
    }

    async fn revoke_family_of(&self, token: &str) {
        let Ok(claims) = jwt::decode_unverified(token) else {
            return;
        };
        if let Some(family) = claims.family.as_deref()
            && let Err(err) = self.tokens.revoke_family(family).await
        {
            warn!(family, "failed to revoke reused token family: {err}");
        }
    }

    async fn login_failed(
        &self,
        email: &str,
        user_id: Option<Uuid>,
        client: &ClientInfo,
        reason: &str,
    ) {
        let mut event = AuditEvent::new(AuditEventType::LoginFailure, self.clock.now())
            .email(email)
            .client(client)
            .detail("reason", reason);
        if let Some(user_id) = user_id {
            event = event.user(user_id);
        }
        audit::emit(self.audit.as_ref(), event).await;
    }
}

/// The attempt that trips the lock reports the lock; earlier ones stay
/// generic.
fn failed_login_denial(outcome: &LockoutOutcome) -> Denial {
    if outcome.locked {
        let remaining = outcome.lockout_duration.map(|duration| duration.as_secs().max(1));
        let unlock_at = outcome
            .locked_until
            .map(|until| until.format("%Y-%m-%d %H:%M:%S UTC").to_string());
        return Denial::new(DenyReason::AccountLocked {
            remaining_seconds: remaining,
            unlock_at,
        });
    }
    Denial::new(DenyReason::InvalidCredentials)
        .with_detail("remaining_attempts", outcome.remaining_attempts)
}
