//! Credential Verifier
//! Mission: Hash and check passwords with bcrypt, off the async runtime

use bcrypt::{hash, verify};
use thiserror::Error;
use tracing::warn;

/// Maximum password length (bcrypt only reads 72 bytes)
pub const MAX_PASSWORD_LENGTH: usize = 72;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// bcrypt hasher with a fixed work factor
pub struct PasswordHasher {
    cost: u32,
    // Verified against when the account does not exist, so unknown users
    // cost the same bcrypt round as wrong passwords.
    dummy_hash: String,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Result<Self, CredentialError> {
        let dummy_hash = hash("authgate-timing-equalizer", cost)
            .map_err(|e| CredentialError::Hashing(e.to_string()))?;
        Ok(Self { cost, dummy_hash })
    }

    /// Hash a password. Every call draws a fresh salt.
    pub async fn hash(&self, plaintext: &str) -> Result<String, CredentialError> {
        let password = plaintext.to_string();
        let cost = self.cost;

        tokio::task::spawn_blocking(move || {
            hash(password, cost).map_err(|e| CredentialError::Hashing(e.to_string()))
        })
        .await
        .map_err(|e| CredentialError::Hashing(format!("Task join error: {}", e)))?
    }

    /// Check a password against a stored hash.
    ///
    /// Mismatch is `false`. An unparseable stored hash can never match and is
    /// also `false`, with a warning.
    pub async fn verify(&self, plaintext: &str, stored_hash: &str) -> bool {
        let password = plaintext.to_string();
        let stored = stored_hash.to_string();

        match tokio::task::spawn_blocking(move || verify(password, &stored)).await {
            Ok(Ok(valid)) => valid,
            Ok(Err(e)) => {
                warn!(error = %e, "Stored password hash could not be checked");
                false
            }
            Err(e) => {
                warn!(error = %e, "Password verification task failed");
                false
            }
        }
    }

    /// Burn one verification for a login against a missing account.
    pub async fn verify_dummy(&self, plaintext: &str) {
        let _ = self.verify(plaintext, &self.dummy_hash).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(4).unwrap()
    }

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hasher = hasher();
        let stored = hasher.hash("secret1").await.unwrap();

        assert!(stored.starts_with("$2"));
        assert!(hasher.verify("secret1", &stored).await);
        assert!(!hasher.verify("secret2", &stored).await);
    }

    #[tokio::test]
    async fn test_same_input_different_salts() {
        let hasher = hasher();
        let first = hasher.hash("password123").await.unwrap();
        let second = hasher.hash("password123").await.unwrap();

        assert_ne!(first, second);
        assert!(hasher.verify("password123", &first).await);
        assert!(hasher.verify("password123", &second).await);
    }

    #[tokio::test]
    async fn test_malformed_hash_is_mismatch() {
        let hasher = hasher();
        assert!(!hasher.verify("anything", "not-a-bcrypt-hash").await);
        assert!(!hasher.verify("anything", "").await);
    }

    #[tokio::test]
    async fn test_verify_dummy_does_not_panic() {
        hasher().verify_dummy("whatever").await;
    }

    #[tokio::test]
    async fn test_hash_uses_configured_cost() {
        let stored = hasher().hash("secret1").await.unwrap();
        assert!(stored.contains("$04$"));
    }
}
