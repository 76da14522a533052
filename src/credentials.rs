//! Credential hashing and verification.
//!
//! Secrets are hashed with argon2id into PHC strings that carry their own
//! salt and parameters. The raw secret is never stored.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use thiserror::Error;

use crate::db::DbUser;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Failed to hash secret: {0}")]
    Hash(String),

    #[error("Invalid hashing parameters: {0}")]
    Params(String),
}

/// The hashing primitive used for user credentials.
pub trait CredentialHasher {
    /// Hash `secret` into an opaque, salted string.
    fn hash(&self, secret: &str) -> Result<String, CredentialError>;

    /// Whether `secret` matches `stored`. Malformed hashes never match.
    fn matches(&self, secret: &str, stored: &str) -> bool;
}

/// Argon2id hasher.
#[derive(Clone)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }
}

impl Argon2Hasher {
    /// Hasher with explicit cost parameters (memory in KiB, iterations, lanes).
    pub fn with_cost(m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self, CredentialError> {
        let params = Params::new(m_cost, t_cost, p_cost, None)
            .map_err(|e| CredentialError::Params(e.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, secret: &str) -> Result<String, CredentialError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| CredentialError::Hash(e.to_string()))
    }

    fn matches(&self, secret: &str, stored: &str) -> bool {
        let parsed = match PasswordHash::new(stored) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("Stored credential hash is not a valid PHC string: {}", e);
                return false;
            }
        };
        // Parameters are read from the PHC string, not from `self`.
        self.argon2
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    }
}

/// Replace the user's credential hash with `hash(raw_secret)`.
pub fn set_credential<H: CredentialHasher + ?Sized>(
    hasher: &H,
    user: &mut DbUser,
    raw_secret: &str,
) -> Result<(), CredentialError> {
    user.credential_hash = hasher.hash(raw_secret)?;
    Ok(())
}

/// Check `raw_secret` against the user's stored hash. Never fails; a
/// mismatch is `false`.
pub fn verify_credential<H: CredentialHasher + ?Sized>(
    hasher: &H,
    user: &DbUser,
    raw_secret: &str,
) -> bool {
    hasher.matches(raw_secret, &user.credential_hash)
}
