//! Process-local cache of successful verifications.
//!
//! Entries never outlive the token they describe. Failed verifications are
//! never cached.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

use super::claims::TokenClaims;
use crate::clock::after;

#[derive(Debug, Clone)]
struct CacheEntry {
    claims: TokenClaims,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct VerificationCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl VerificationCache {
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    pub async fn get(&self, token: &str, now: DateTime<Utc>) -> Option<TokenClaims> {
        let mut entries = self.entries.lock().await;
        match entries.get(token) {
            Some(entry) if entry.expires_at > now => Some(entry.claims.clone()),
            Some(_) => {
                entries.remove(token);
                None
            }
            None => None,
        }
    }

    /// Cache until `min(now + ttl, exp)`.
    pub async fn insert(&self, token: &str, claims: &TokenClaims, now: DateTime<Utc>) {
        if self.max_entries == 0 {
            return;
        }
        let expires_at = after(now, self.ttl).min(claims.expires_at());
        if expires_at <= now {
            return;
        }

        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.expires_at > now);
        if entries.len() >= self.max_entries && !entries.contains_key(token) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            token.to_string(),
            CacheEntry {
                claims: claims.clone(),
                expires_at,
            },
        );
    }

    pub async fn remove(&self, token: &str) {
        self.entries.lock().await.remove(token);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::claims::TokenType;
    use uuid::Uuid;

    fn claims(now: DateTime<Utc>, ttl_seconds: i64) -> TokenClaims {
        TokenClaims {
            sub: Uuid::nil(),
            email: "a@example.com".to_string(),
            role: "user".to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + ttl_seconds,
            aud: "portal".to_string(),
            iss: "gatehouse".to_string(),
            typ: TokenType::Access,
            family: None,
            jti: None,
        }
    }

    #[tokio::test]
    async fn entry_ttl_is_capped_by_token_expiry() {
        let cache = VerificationCache::new(Duration::from_secs(300), 10);
        let now = Utc::now();
        cache.insert("short", &claims(now, 30), now).await;
        cache.insert("long", &claims(now, 3600), now).await;

        let later = now + chrono::Duration::seconds(31);
        assert!(cache.get("short", later).await.is_none());
        assert!(cache.get("long", later).await.is_some());

        let much_later = now + chrono::Duration::seconds(301);
        assert!(cache.get("long", much_later).await.is_none());
    }

    #[tokio::test]
    async fn expired_tokens_are_not_cached() {
        let cache = VerificationCache::new(Duration::from_secs(300), 10);
        let now = Utc::now();
        cache.insert("dead", &claims(now, -1), now).await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn bounded_size_evicts_soonest_expiring() {
        let cache = VerificationCache::new(Duration::from_secs(300), 2);
        let now = Utc::now();
        cache.insert("a", &claims(now, 60), now).await;
        cache.insert("b", &claims(now, 120), now).await;
        cache.insert("c", &claims(now, 180), now).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("a", now).await.is_none());
        assert!(cache.get("b", now).await.is_some());
        assert!(cache.get("c", now).await.is_some());
    }
}
