//! Store key namespaces.
//!
//! These layouts are shared with existing deployments and must stay stable.

use sha2::{Digest, Sha256};

/// `rate:<scope>:<client>:<method>:<path>[:<userId>]`
#[must_use]
pub fn rate(
    scope: &str,
    client: &str,
    method: &str,
    path: &str,
    user_id: Option<&str>,
) -> String {
    match user_id {
        Some(user_id) => format!("rate:{scope}:{client}:{method}:{path}:{user_id}"),
        None => format!("rate:{scope}:{client}:{method}:{path}"),
    }
}

/// Progressive-window violation counter for a rate-limit key.
#[must_use]
pub fn rate_violations(rate_key: &str) -> String {
    format!("{rate_key}:violations")
}

/// `violations:<client>`
#[must_use]
pub fn violations(client: &str) -> String {
    format!("violations:{client}")
}

/// `banned:ip:<ip>`
#[must_use]
pub fn banned_ip(ip: &str) -> String {
    format!("banned:ip:{ip}")
}

pub const BANNED_IP_PATTERN: &str = "banned:ip:*";

/// `blacklist:<token>`
#[must_use]
pub fn blacklist(token: &str) -> String {
    format!("blacklist:{token}")
}

/// `lockout:count:<email>`
#[must_use]
pub fn lockout_count(email: &str) -> String {
    format!("lockout:count:{email}")
}

/// `lockout:ip:<ip>`, the set of accounts an address has locked.
#[must_use]
pub fn lockout_ip(ip: &str) -> String {
    format!("lockout:ip:{ip}")
}

/// `token_family:<family>`
#[must_use]
pub fn token_family(family: &str) -> String {
    format!("token_family:{family}")
}

/// Short, non-reversible token reference for logs and audit details.
#[must_use]
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_key_layout() {
        assert_eq!(
            rate("api", "10.0.0.1", "GET", "/v1/items", None),
            "rate:api:10.0.0.1:GET:/v1/items"
        );
        assert_eq!(
            rate("api", "10.0.0.1", "GET", "/v1/items", Some("u1")),
            "rate:api:10.0.0.1:GET:/v1/items:u1"
        );
    }

    #[test]
    fn fixed_namespaces() {
        assert_eq!(violations("1.2.3.4"), "violations:1.2.3.4");
        assert_eq!(banned_ip("1.2.3.4"), "banned:ip:1.2.3.4");
        assert_eq!(blacklist("abc"), "blacklist:abc");
        assert_eq!(lockout_count("a@b.c"), "lockout:count:a@b.c");
        assert_eq!(token_family("f1"), "token_family:f1");
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        assert_eq!(fingerprint("token"), fingerprint("token"));
        assert_ne!(fingerprint("token"), fingerprint("other"));
        assert_eq!(fingerprint("token").len(), 16);
    }
}
