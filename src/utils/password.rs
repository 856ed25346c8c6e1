// Password hashing and verification using Argon2id
// The core only sees the PasswordHasher interface; Argon2 is the production
// implementation.

use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingError(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,
}

/// Verifies (and produces) password hashes. Implementations MUST NOT reveal
/// through the error channel whether a stored hash was malformed.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, PasswordError>;

    /// Constant-time comparison of `password` against `password_hash`.
    /// Returns false for malformed hashes.
    fn matches(&self, password: &str, password_hash: &str) -> bool;
}

/// Configuration for Argon2id password hashing
#[derive(Debug, Clone)]
pub struct PasswordConfig {
    /// Memory cost in KiB (default: 19456 = 19 MiB)
    pub memory_cost: u32,
    /// Time cost (iterations, default: 2)
    pub time_cost: u32,
    /// Parallelism factor (default: 1)
    pub parallelism: u32,
    /// Output hash length in bytes (default: 32)
    pub output_length: usize,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        // OWASP recommended minimum parameters for Argon2id
        // https://cheatsheetseries.owasp.org/cheatsheets/Password_Storage_Cheat_Sheet.html
        Self {
            memory_cost: 19456,
            time_cost: 2,
            parallelism: 1,
            output_length: 32,
        }
    }
}

impl PasswordConfig {
    fn build_hasher(&self) -> Result<Argon2<'static>, PasswordError> {
        let params = Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(self.output_length),
        )
        .map_err(|e| PasswordError::HashingError(e.to_string()))?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Production Argon2id hasher.
pub struct Argon2PasswordHasher {
    config: PasswordConfig,
}

impl Argon2PasswordHasher {
    pub fn new(config: PasswordConfig) -> Self {
        Self { config }
    }
}

impl Default for Argon2PasswordHasher {
    fn default() -> Self {
        Self::new(PasswordConfig::default())
    }
}

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let hasher = self.config.build_hasher()?;
        let salt = SaltString::generate(&mut OsRng);

        hasher
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| PasswordError::HashingError(e.to_string()))
    }

    fn matches(&self, password: &str, password_hash: &str) -> bool {
        let parsed = match PasswordHash::new(password_hash) {
            Ok(parsed) => parsed,
            Err(_) => return false,
        };

        let hasher = match self.config.build_hasher() {
            Ok(hasher) => hasher,
            Err(_) => return false,
        };

        hasher
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher() -> Argon2PasswordHasher {
        // Cheap parameters so the test suite stays quick
        Argon2PasswordHasher::new(PasswordConfig {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
            output_length: 32,
        })
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let hasher = fast_hasher();
        let hash = hasher.hash("admin123").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.matches("admin123", &hash));
        assert!(!hasher.matches("admin124", &hash));
    }

    #[test]
    fn malformed_hash_never_matches() {
        let hasher = fast_hasher();
        assert!(!hasher.matches("whatever", "not-a-phc-string"));
        assert!(!hasher.matches("whatever", ""));
    }

    #[test]
    fn same_password_salts_differently() {
        let hasher = fast_hasher();
        let a = hasher.hash("admin123").unwrap();
        let b = hasher.hash("admin123").unwrap();
        assert_ne!(a, b);
        assert!(hasher.matches("admin123", &a));
        assert!(hasher.matches("admin123", &b));
    }
}
