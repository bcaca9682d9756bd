use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashError {
    #[error("invalid hashing parameters: {0}")]
    Params(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Argon2id hashing into PHC strings.
///
/// Verification reads the parameters embedded in each PHC string, so hashes
/// made with older parameters keep verifying after a change.
#[derive(Clone, Debug)]
pub struct Hasher {
    params: Params,
    dummy: OnceLock<String>,
}

const DUMMY_PASSWORD: &str = "gatehouse-unknown-account";
const DUMMY_SALT: &[u8; 16] = b"gatehouse-dummy!";

impl Default for Hasher {
    fn default() -> Self {
        Self {
            params: Params::default(),
            dummy: OnceLock::new(),
        }
    }
}

impl Hasher {
    /// # Errors
    ///
    /// Returns an error if Argon2 rejects the parameters.
    pub fn with_params(m_cost_kib: u32, t_cost: u32, p_cost: u32) -> Result<Self, HashError> {
        let params = Params::new(m_cost_kib, t_cost, p_cost, None)
            .map_err(|err| HashError::Params(err.to_string()))?;
        Ok(Self {
            params,
            dummy: OnceLock::new(),
        })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// # Errors
    ///
    /// Returns an error if salt generation or hashing fails.
    pub fn hash(&self, password: &str) -> Result<String, HashError> {
        let mut salt_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt =
            SaltString::encode_b64(&salt_bytes).map_err(|err| HashError::Hash(err.to_string()))?;
        let phc = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| HashError::Hash(err.to_string()))?
            .to_string();
        Ok(phc)
    }

    /// Runs one full verification against a fixed hash made with this
    /// hasher's parameters. Used for unknown accounts so they cost as much as
    /// a wrong password; the result is discarded.
    pub fn verify_dummy(&self, password: &str) {
        let phc = self.dummy.get_or_init(|| {
            SaltString::encode_b64(DUMMY_SALT)
                .ok()
                .and_then(|salt| {
                    self.argon2()
                        .hash_password(DUMMY_PASSWORD.as_bytes(), &salt)
                        .map(|hash| hash.to_string())
                        .ok()
                })
                .unwrap_or_default()
        });
        let _ = self.verify(password, phc);
    }

    #[cfg(test)]
    pub(crate) fn dummy_hash(&self) -> Option<&str> {
        self.dummy.get().map(String::as_str)
    }

    /// `false` for mismatches and for unparseable hashes.
    #[must_use]
    pub fn verify(&self, password: &str, phc: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(phc) else {
            return false;
        };
        self.argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> Hasher {
    Hasher::with_params(8, 1, 1).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() -> Result<(), HashError> {
        let hasher = test_hasher();
        let phc = hasher.hash("correct horse")?;
        assert!(phc.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse", &phc));
        assert!(!hasher.verify("wrong horse", &phc));
        Ok(())
    }

    #[test]
    fn salts_differ() -> Result<(), HashError> {
        let hasher = test_hasher();
        assert_ne!(hasher.hash("same")?, hasher.hash("same")?);
        Ok(())
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!test_hasher().verify("anything", "not-a-phc-string"));
    }

    #[test]
    fn dummy_hash_uses_the_configured_params() {
        let hasher = test_hasher();
        assert!(hasher.dummy_hash().is_none());
        hasher.verify_dummy("whatever");
        let phc = hasher.dummy_hash().map(str::to_owned);
        assert!(phc.as_deref().is_some_and(|phc| phc.starts_with("$argon2id$")));
        assert!(phc.as_deref().is_some_and(|phc| phc.contains("m=8,t=1,p=1")));
        hasher.verify_dummy("something else");
        assert_eq!(hasher.dummy_hash().map(str::to_owned), phc);
    }

    #[test]
    fn invalid_params_are_rejected() {
        assert!(matches!(
            Hasher::with_params(0, 0, 0),
            Err(HashError::Params(_))
        ));
    }
}
