//! Bearer tokens: HS256 signing, validation, revocation and refresh families.

use axum::http::{HeaderMap, HeaderValue, header::InvalidHeaderValue};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;

use crate::decision::DenyReason;
use crate::store::StoreError;

mod cache;
pub mod claims;
mod issuer;
pub mod jwt;
mod validator;

pub use cache::VerificationCache;
pub use claims::{TokenClaims, TokenIdentity, TokenType};
pub use issuer::{TokenIssuer, TokenPair};
pub use validator::{TokenValidator, ValidationOptions};

const DEFAULT_ISSUER: &str = "gatehouse";
const DEFAULT_AUDIENCE: &str = "portal";
const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;
pub const DEFAULT_COOKIE_NAME: &str = "auth_token";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signing key")]
    InvalidKey,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid audience")]
    InvalidAudience,
    #[error("token store error: {0}")]
    Store(#[from] StoreError),
}

impl TokenError {
    /// The denial a client sees for this failure.
    #[must_use]
    pub fn deny_reason(&self) -> DenyReason {
        match self {
            Self::TokenFormat | Self::Base64 | Self::Json(_) | Self::UnsupportedAlg(_) => {
                DenyReason::MalformedToken
            }
            Self::InvalidKey | Self::Store(_) => DenyReason::ServiceUnavailable,
            Self::InvalidSignature => DenyReason::InvalidSignature,
            Self::Expired => DenyReason::ExpiredToken,
            Self::InvalidIssuer => DenyReason::InvalidIssuer,
            Self::InvalidAudience => DenyReason::InvalidAudience,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TokenConfig {
    secret: SecretString,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    cache_ttl: Duration,
    cache_max_entries: usize,
    cookie_name: String,
    cookie_secure: bool,
}

impl TokenConfig {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            cookie_secure: true,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    #[must_use]
    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_cache_max_entries(mut self, max_entries: usize) -> Self {
        self.cache_max_entries = max_entries;
        self
    }

    #[must_use]
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    pub(crate) fn secret_bytes(&self) -> &[u8] {
        self.secret.expose_secret().as_bytes()
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    #[must_use]
    pub fn cache_max_entries(&self) -> usize {
        self.cache_max_entries
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }
}

/// Token from `Authorization: Bearer`, falling back to the named cookie.
#[must_use]
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    extract_bearer_token(headers).or_else(|| extract_cookie(headers, cookie_name))
}

#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn extract_cookie(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    for header in headers.get_all(axum::http::header::COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            let val = val.trim();
            if key.trim() == cookie_name && !val.is_empty() {
                return Some(val.to_string());
            }
        }
    }
    None
}

/// Build a `HttpOnly` cookie carrying the access token.
///
/// # Errors
///
/// Returns an error if the token contains characters not allowed in a header.
pub fn token_cookie(config: &TokenConfig, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = config.access_ttl().as_secs();
    let mut cookie = format!(
        "{}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}",
        config.cookie_name()
    );
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Expire the token cookie.
///
/// # Errors
///
/// Returns an error if the configured cookie name is not a valid header value.
pub fn clear_token_cookie(config: &TokenConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        config.cookie_name()
    );
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn bearer_header_wins_over_cookie() -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer header-token"));
        headers.insert("cookie", HeaderValue::from_static("auth_token=cookie-token"));
        assert_eq!(
            extract_token(&headers, DEFAULT_COOKIE_NAME).as_deref(),
            Some("header-token")
        );
        Ok(())
    }

    #[test]
    fn cookie_is_used_when_no_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            HeaderValue::from_static("theme=dark; sb-access-token=abc.def.ghi"),
        );
        assert_eq!(
            extract_token(&headers, "sb-access-token").as_deref(),
            Some("abc.def.ghi")
        );
        assert_eq!(extract_token(&headers, DEFAULT_COOKIE_NAME), None);
    }

    #[test]
    fn empty_bearer_is_missing() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn cookie_flags_follow_config() -> Result<()> {
        let config = TokenConfig::new(SecretString::from("secret".to_string()))
            .with_cookie_secure(false)
            .with_access_ttl(Duration::from_secs(60));
        let cookie = token_cookie(&config, "t")?;
        assert_eq!(
            cookie.to_str()?,
            "auth_token=t; Path=/; HttpOnly; SameSite=Lax; Max-Age=60"
        );
        let cleared = clear_token_cookie(&config.with_cookie_secure(true))?;
        assert!(cleared.to_str()?.ends_with("Max-Age=0; Secure"));
        Ok(())
    }

    #[test]
    fn token_errors_map_to_reasons() {
        assert_eq!(TokenError::Base64.deny_reason(), DenyReason::MalformedToken);
        assert_eq!(
            TokenError::InvalidSignature.deny_reason(),
            DenyReason::InvalidSignature
        );
        assert_eq!(TokenError::Expired.deny_reason(), DenyReason::ExpiredToken);
    }
}
