//! Password hashing and verification using Argon2
//!
//! The configured console password is hashed once at startup; only the PHC
//! string is kept in memory.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::types::GatewayError;

/// Hash a password using Argon2id
///
/// Returns the PHC-formatted hash string that includes the salt and parameters.
pub fn hash_password(password: &str) -> Result<String, GatewayError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GatewayError::Auth(format!("Failed to hash password: {e}")))
}

/// Verify a password against a stored hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, GatewayError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| GatewayError::Auth(format!("Invalid password hash format: {e}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// The single console account
#[derive(Debug, Clone)]
pub struct ConsoleCredentials {
    username: String,
    password_hash: String,
}

impl ConsoleCredentials {
    pub fn new(username: impl Into<String>, password: &str) -> Result<Self, GatewayError> {
        Ok(Self {
            username: username.into(),
            password_hash: hash_password(password)?,
        })
    }

    /// Check a login attempt. Malformed state counts as a failed login.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        if username != self.username {
            return false;
        }
        verify_password(password, &self.password_hash).unwrap_or(false)
    }
}
