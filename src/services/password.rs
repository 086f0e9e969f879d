//! Password hashing module
//!
//! Passwords are hashed with Argon2id using the argon2 crate's default
//! parameters and a random salt per password. Hashes are stored in PHC
//! string format, so parameters and salt travel with the hash.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Minimum accepted password length, in characters
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Errors raised by password hashing and verification.
///
/// A wrong password is not an error: [`check_password`] returns `Ok(false)`.
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("failed to hash password: {0}")]
    Hash(String),

    #[error("stored password hash is malformed: {0}")]
    MalformedHash(String),

    #[error("password verification failed: {0}")]
    Verify(String),
}

/// Hash a password using Argon2id with secure defaults.
///
/// # Example
///
/// ```ignore
/// use simplebank::services::password::hash_password;
///
/// let hash = hash_password("my_secure_password")?;
/// assert!(hash.starts_with("$argon2id$"));
/// ```
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::Hash(e.to_string()))?;

    Ok(password_hash.to_string())
}

/// Check a password against a stored hash.
///
/// Returns `Ok(true)` on a match and `Ok(false)` on a mismatch. The digest
/// comparison is constant time.
///
/// # Errors
///
/// Returns `MalformedHash` if the stored hash cannot be parsed.
pub fn check_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| PasswordError::MalformedHash(e.to_string()))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::Verify(e.to_string())),
    }
}
