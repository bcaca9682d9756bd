use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::TokenError;
use super::claims::{ALG_HS256, TokenClaims, TokenHeader};

type HmacSha256 = Hmac<Sha256>;

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn split(token: &str) -> Result<(&str, &str, &str), TokenError> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
    if parts.next().is_some() || header_b64.is_empty() || claims_b64.is_empty() || sig_b64.is_empty()
    {
        return Err(TokenError::TokenFormat);
    }
    Ok((header_b64, claims_b64, sig_b64))
}

fn mac(secret: &[u8]) -> Result<HmacSha256, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::InvalidKey);
    }
    HmacSha256::new_from_slice(secret).map_err(|_| TokenError::InvalidKey)
}

/// Create an HS256 signed token.
///
/// # Errors
///
/// Returns an error if the secret is empty or the claims cannot be encoded.
pub fn sign_hs256(secret: &[u8], claims: &TokenClaims) -> Result<String, TokenError> {
    let header_b64 = b64e_json(&TokenHeader::hs256())?;
    let claims_b64 = b64e_json(claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let mut mac = mac(secret)?;
    mac.update(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Decode header and claims without touching the signature.
///
/// # Errors
///
/// Returns an error if the token is not three base64url JSON segments or the
/// header names an algorithm other than HS256.
pub fn decode_unverified(token: &str) -> Result<TokenClaims, TokenError> {
    let (header_b64, claims_b64, _) = split(token)?;
    let header: TokenHeader = b64d_json(header_b64)?;
    if header.alg != ALG_HS256 {
        return Err(TokenError::UnsupportedAlg(header.alg));
    }
    b64d_json(claims_b64)
}

/// Format and expiry check with no cryptography.
///
/// # Errors
///
/// Returns the decode error, or `Expired` when `exp <= now`.
pub fn quick_check(token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenError> {
    let claims = decode_unverified(token)?;
    if claims.is_expired_at(now) {
        return Err(TokenError::Expired);
    }
    Ok(claims)
}

/// Verify an HS256 token and return its claims.
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64/json,
/// - the signature does not match (compared in constant time),
/// - the claims fail validation (`iss`, `aud`, `exp`).
pub fn verify_hs256(
    token: &str,
    secret: &[u8],
    expected_issuer: Option<&str>,
    expected_audience: Option<&str>,
    now: DateTime<Utc>,
) -> Result<TokenClaims, TokenError> {
    let (header_b64, claims_b64, sig_b64) = split(token)?;

    let header: TokenHeader = b64d_json(header_b64)?;
    if header.alg != ALG_HS256 {
        return Err(TokenError::UnsupportedAlg(header.alg));
    }

    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Base64)?;
    let mut mac = mac(secret)?;
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| TokenError::InvalidSignature)?;

    let claims: TokenClaims = b64d_json(claims_b64)?;
    check_claims(&claims, expected_issuer, expected_audience)?;
    if claims.is_expired_at(now) {
        return Err(TokenError::Expired);
    }

    Ok(claims)
}

/// Issuer and audience checks, shared with cache hits.
pub(crate) fn check_claims(
    claims: &TokenClaims,
    expected_issuer: Option<&str>,
    expected_audience: Option<&str>,
) -> Result<(), TokenError> {
    if let Some(issuer) = expected_issuer
        && claims.iss != issuer
    {
        return Err(TokenError::InvalidIssuer);
    }
    if let Some(audience) = expected_audience
        && claims.aud != audience
    {
        return Err(TokenError::InvalidAudience);
    }
    Ok(())
}
