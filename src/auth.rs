//! Patient credentials: salted PBKDF2-SHA256 hashes keyed by lower-cased email.

use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::{Params, Pbkdf2};
use rand::RngCore;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{UserCredential, ValidationError};
use crate::store::{StorageBackend, StoreError};

pub const DEFAULT_ROUNDS: u32 = 600_000;
pub const MIN_ROUNDS: u32 = 1_000;
pub const MIN_PASSWORD_LEN: usize = 6;
const SALT_LENGTH: usize = 16;
const OUTPUT_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("password hashing failed: {0}")]
    Hash(String),
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Checks performed on the registration form before anything is stored.
pub fn validate_registration(email: &str, password: &str) -> Result<(), ValidationError> {
    if email.trim().is_empty() {
        return Err(ValidationError::Missing { field: "email" });
    }
    if !email.contains('@') {
        return Err(ValidationError::InvalidEmail);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::WeakPassword(MIN_PASSWORD_LEN));
    }
    Ok(())
}

/// PBKDF2 parameters used for new hashes. Stored hashes carry their own
/// parameters, so changing `rounds` never invalidates existing accounts.
#[derive(Debug, Clone, Copy)]
pub struct PasswordPolicy {
    rounds: u32,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            rounds: DEFAULT_ROUNDS,
        }
    }
}

impl PasswordPolicy {
    pub fn with_rounds(rounds: u32) -> Self {
        Self {
            rounds: rounds.max(MIN_ROUNDS),
        }
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        let mut salt_bytes = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::Hash(e.to_string()))?;

        let params = Params {
            rounds: self.rounds,
            output_length: OUTPUT_LENGTH,
        };
        let hash = Pbkdf2
            .hash_password_customized(password.as_bytes(), None, None, params, &salt)
            .map_err(|e| AuthError::Hash(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// Constant-time comparison happens inside `password_hash`; a stored value
    /// that does not parse verifies as `false`.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        match PasswordHash::new(stored) {
            Ok(parsed) => Pbkdf2.verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(err) => {
                warn!(error = %err, "stored password hash is malformed");
                false
            }
        }
    }
}

pub struct CredentialStore<B> {
    backend: B,
    policy: PasswordPolicy,
}

impl<B: StorageBackend> CredentialStore<B> {
    pub fn new(backend: B, policy: PasswordPolicy) -> Self {
        Self { backend, policy }
    }

    /// Returns `false` when the email is already registered; the existing
    /// hash is left untouched.
    pub async fn register(&self, email: &str, password: &str) -> Result<bool, AuthError> {
        let email = normalize_email(email);
        if self.backend.password_hash(&email).await?.is_some() {
            return Ok(false);
        }

        let policy = self.policy;
        let owned = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || policy.hash(&owned))
            .await
            .map_err(|e| AuthError::Hash(e.to_string()))??;

        let created = self
            .backend
            .insert_user(&UserCredential {
                email: email.clone(),
                password_hash,
            })
            .await?;
        if created {
            info!(email = %email, "registered new user");
        }
        Ok(created)
    }

    pub async fn verify(&self, email: &str, password: &str) -> Result<bool, AuthError> {
        let email = normalize_email(email);
        let Some(stored) = self.backend.password_hash(&email).await? else {
            return Ok(false);
        };

        let policy = self.policy;
        let owned = password.to_string();
        tokio::task::spawn_blocking(move || policy.verify(&owned, &stored))
            .await
            .map_err(|e| AuthError::Hash(e.to_string()))
    }

    pub async fn users(&self) -> Result<Vec<UserCredential>, AuthError> {
        Ok(self.backend.users().await?)
    }

    pub async fn purge(&self) -> Result<u64, AuthError> {
        Ok(self.backend.clear_users().await?)
    }
}
