use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::cache::VerificationCache;
use super::claims::{TokenClaims, TokenIdentity, TokenType};
use super::{TokenConfig, jwt};
use crate::audit::{self, AuditEvent, AuditEventType, AuditLog, ClientInfo};
use crate::clock::Clock;
use crate::decision::{Decision, Denial, DenyReason};
use crate::store::{KeyValueStore, StoreError, keys};

/// Per-call validation knobs. `None` falls back to the configured value.
#[derive(Clone, Debug)]
pub struct ValidationOptions {
    pub audience: Option<String>,
    pub issuer: Option<String>,
    pub check_revocation: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            audience: None,
            issuer: None,
            check_revocation: true,
        }
    }
}

impl ValidationOptions {
    #[must_use]
    pub fn without_revocation(mut self) -> Self {
        self.check_revocation = false;
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }
}

pub struct TokenValidator {
    config: TokenConfig,
    store: Arc<dyn KeyValueStore>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
    cache: VerificationCache,
}

impl TokenValidator {
    #[must_use]
    pub fn new(
        config: TokenConfig,
        store: Arc<dyn KeyValueStore>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = VerificationCache::new(config.cache_ttl(), config.cache_max_entries());
        Self {
            config,
            store,
            audit,
            clock,
            cache,
        }
    }

    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &VerificationCache {
        &self.cache
    }

    /// Validate an access token.
    #[instrument(skip_all)]
    pub async fn validate(
        &self,
        token: &str,
        options: &ValidationOptions,
        client: &ClientInfo,
    ) -> Decision<TokenIdentity> {
        let decision = match self.verified_claims(token, options).await {
            Ok(claims) if claims.typ == TokenType::Access => {
                Decision::Allow(TokenIdentity::from(&claims))
            }
            Ok(_) => Decision::deny(DenyReason::WrongTokenType),
            Err(denial) => Decision::Deny(denial),
        };
        if let Some(denial) = decision.denial() {
            self.audit_failure(token, denial, client).await;
        }
        decision
    }

    /// Validate a refresh token, including its family head.
    ///
    /// Presenting a member that is no longer the family head blacklists it and
    /// fails with `superseded`.
    #[instrument(skip_all)]
    pub async fn validate_refresh(&self, token: &str, client: &ClientInfo) -> Decision<TokenIdentity> {
        let decision = match self
            .verified_claims(token, &ValidationOptions::default())
            .await
        {
            Ok(claims) => self.check_family(token, &claims, client).await,
            Err(denial) => Decision::Deny(denial),
        };
        if let Some(denial) = decision.denial() {
            self.audit_failure(token, denial, client).await;
        }
        decision
    }

    /// Blacklist a token for the rest of its lifetime.
    ///
    /// Returns `false` when the token is unreadable or already expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    pub async fn revoke(&self, token: &str, client: &ClientInfo) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let Ok(claims) = jwt::decode_unverified(token) else {
            return Ok(false);
        };
        let remaining = claims.remaining_seconds(now);
        if remaining == 0 {
            return Ok(false);
        }
        self.store
            .set(
                &keys::blacklist(token),
                "1",
                Some(std::time::Duration::from_secs(remaining)),
            )
            .await?;
        self.cache.remove(token).await;
        audit::emit(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventType::TokenRevoked, now)
                .user(claims.sub)
                .email(claims.email.clone())
                .client(client)
                .detail("token", keys::fingerprint(token))
                .detail("token_type", claims.typ.as_str()),
        )
        .await;
        Ok(true)
    }

    /// Drop the family head so every member of the family is rejected.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the delete.
    pub async fn revoke_family(&self, family: &str) -> Result<bool, StoreError> {
        self.store.del(&keys::token_family(family)).await
    }

    async fn verified_claims(
        &self,
        token: &str,
        options: &ValidationOptions,
    ) -> Result<TokenClaims, Denial> {
        if token.trim().is_empty() {
            return Err(Denial::new(DenyReason::MissingToken));
        }
        let now = self.clock.now();
        jwt::quick_check(token, now).map_err(|err| Denial::new(err.deny_reason()))?;

        if options.check_revocation && self.is_blacklisted(token).await {
            return Err(Denial::new(DenyReason::RevokedToken));
        }

        let issuer = options.issuer.as_deref().unwrap_or(self.config.issuer());
        let audience = options.audience.as_deref().unwrap_or(self.config.audience());

        if let Some(claims) = self.cache.get(token, now).await {
            debug!("token verification cache hit");
            jwt::check_claims(&claims, Some(issuer), Some(audience))
                .map_err(|err| Denial::new(err.deny_reason()))?;
            return Ok(claims);
        }

        let claims = jwt::verify_hs256(
            token,
            self.config.secret_bytes(),
            Some(issuer),
            Some(audience),
            now,
        )
        .map_err(|err| Denial::new(err.deny_reason()))?;
        self.cache.insert(token, &claims, now).await;
        Ok(claims)
    }

    async fn is_blacklisted(&self, token: &str) -> bool {
        if !self.store.is_available() {
            warn!("store unavailable, skipping revocation check");
            return false;
        }
        match self.store.exists(&keys::blacklist(token)).await {
            Ok(listed) => listed,
            Err(err) => {
                warn!("revocation check failed, allowing: {err}");
                false
            }
        }
    }

    async fn check_family(
        &self,
        token: &str,
        claims: &TokenClaims,
        client: &ClientInfo,
    ) -> Decision<TokenIdentity> {
        if claims.typ != TokenType::Refresh {
            return Decision::deny(DenyReason::WrongTokenType);
        }
        let (Some(family), Some(jti)) = (claims.family.as_deref(), claims.jti.as_deref()) else {
            return Decision::deny(DenyReason::MalformedToken);
        };

        if !self.store.is_available() {
            warn!("store unavailable, skipping token family check");
            return Decision::Allow(TokenIdentity::from(claims));
        }
        let head = match self.store.get(&keys::token_family(family)).await {
            Ok(head) => head,
            Err(err) => {
                warn!("token family check failed, allowing: {err}");
                return Decision::Allow(TokenIdentity::from(claims));
            }
        };

        match head {
            Some(head) if head == jti => Decision::Allow(TokenIdentity::from(claims)),
            Some(_) => {
                self.reject_superseded(token, claims, family, client).await;
                Decision::Deny(
                    Denial::new(DenyReason::SupersededToken).with_detail("family", family),
                )
            }
            None => Decision::Deny(Denial::new(DenyReason::RevokedToken).with_detail("family", family)),
        }
    }

    async fn reject_superseded(
        &self,
        token: &str,
        claims: &TokenClaims,
        family: &str,
        client: &ClientInfo,
    ) {
        let now = self.clock.now();
        let remaining = claims.remaining_seconds(now).max(1);
        if let Err(err) = self
            .store
            .set(
                &keys::blacklist(token),
                "1",
                Some(std::time::Duration::from_secs(remaining)),
            )
            .await
        {
            warn!("failed to blacklist superseded refresh token: {err}");
        }
        self.cache.remove(token).await;
        warn!(family, "refresh token reuse detected");
        audit::emit(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventType::SuspiciousActivity, now)
                .user(claims.sub)
                .email(claims.email.clone())
                .client(client)
                .detail("kind", "refresh_token_reuse")
                .detail("family", family)
                .detail("token", keys::fingerprint(token)),
        )
        .await;
    }

    async fn audit_failure(&self, token: &str, denial: &Denial, client: &ClientInfo) {
        debug!(reason = denial.reason().code(), "token rejected");
        let mut event = AuditEvent::new(AuditEventType::TokenValidationFailure, self.clock.now())
            .client(client)
            .detail("reason", denial.reason().code());
        if !token.is_empty() {
            event = event.detail("token", keys::fingerprint(token));
        }
        if let Ok(claims) = jwt::decode_unverified(token) {
            event = event.user(claims.sub).email(claims.email);
        }
        audit::emit(self.audit.as_ref(), event).await;
    }
}
