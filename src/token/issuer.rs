use serde::Serialize;
use std::sync::Arc;
use ulid::Ulid;
use utoipa::ToSchema;
use uuid::Uuid;

use super::claims::{TokenClaims, TokenType};
use super::{TokenConfig, TokenError, jwt};
use crate::clock::Clock;
use crate::store::{KeyValueStore, keys};
use crate::users::Identity;

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(skip)]
    pub family: String,
    pub expires_in: u64,
    pub token_type: String,
}

/// Signs access and refresh tokens and records refresh family heads.
pub struct TokenIssuer {
    config: TokenConfig,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(config: TokenConfig, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the token cannot be signed.
    pub fn issue_access(&self, user: &Identity) -> Result<String, TokenError> {
        let claims = self.claims(user, TokenType::Access, None);
        jwt::sign_hs256(self.config.secret_bytes(), &claims)
    }

    /// Access token plus a refresh token opening a new family.
    ///
    /// # Errors
    ///
    /// Returns an error if either token cannot be signed or the family head
    /// cannot be stored.
    pub async fn issue_pair(&self, user: &Identity) -> Result<TokenPair, TokenError> {
        self.rotate(user, &Uuid::new_v4().to_string()).await
    }

    /// New pair inside `family`; the new refresh jti becomes the family head.
    ///
    /// # Errors
    ///
    /// Returns an error if either token cannot be signed or the family head
    /// cannot be stored. No pair is handed out in that case.
    pub async fn rotate(&self, user: &Identity, family: &str) -> Result<TokenPair, TokenError> {
        let access_token = self.issue_access(user)?;
        let refresh_claims = self.claims(user, TokenType::Refresh, Some(family));
        let refresh_token = jwt::sign_hs256(self.config.secret_bytes(), &refresh_claims)?;

        if let Some(jti) = refresh_claims.jti.as_deref() {
            self.store
                .set(
                    &keys::token_family(family),
                    jti,
                    Some(self.config.refresh_ttl()),
                )
                .await?;
        }

        Ok(TokenPair {
            access_token,
            refresh_token,
            family: family.to_string(),
            expires_in: self.config.access_ttl().as_secs(),
            token_type: "Bearer".to_string(),
        })
    }

    fn claims(&self, user: &Identity, typ: TokenType, family: Option<&str>) -> TokenClaims {
        let now = self.clock.now().timestamp();
        let ttl = match typ {
            TokenType::Access => self.config.access_ttl(),
            TokenType::Refresh => self.config.refresh_ttl(),
        };
        TokenClaims {
            sub: user.user_id,
            email: user.email.clone(),
            role: user.role.clone(),
            iat: now,
            exp: now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)),
            aud: self.config.audience().to_string(),
            iss: self.config.issuer().to_string(),
            typ,
            family: family.map(ToString::to_string),
            jti: Some(Ulid::new().to_string()),
        }
    }
}
