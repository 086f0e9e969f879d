//! User service
//!
//! Registration and lookup of bank customers. Login lives in
//! [`crate::services::auth`], which reads the same credential store.

use crate::db::is_unique_violation;
use crate::db::repositories::UserRepository;
use crate::models::{CreateUserInput, User};
use crate::services::password::{hash_password, MIN_PASSWORD_LENGTH};
use anyhow::Context;
use std::sync::Arc;

/// Longest accepted username, in characters; matches the column width
pub const MAX_USERNAME_LENGTH: usize = 50;

/// Longest accepted full name or email, in characters
pub const MAX_TEXT_FIELD_LENGTH: usize = 255;

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Validation error (invalid input)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Username or email already taken
    #[error("User already exists: {0}")]
    UserExists(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// User service for registering and looking up users
pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
}

impl UserService {
    /// Create a new user service with the given repository
    pub fn new(user_repo: Arc<dyn UserRepository>) -> Self {
        Self { user_repo }
    }

    /// Register a new user
    ///
    /// # Errors
    ///
    /// - `ValidationError` if a field is missing or malformed
    /// - `UserExists` if the username or email is already taken, whether
    ///   caught by the pre-check or by the unique constraint on insert
    /// - `InternalError` for hashing or database errors
    pub async fn create_user(&self, input: CreateUserInput) -> Result<User, UserServiceError> {
        validate_create_user_input(&input)?;

        if self
            .user_repo
            .get_by_username(&input.username)
            .await
            .context("Failed to check username")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(format!(
                "Username '{}' is already taken",
                input.username
            )));
        }

        if self
            .user_repo
            .get_by_email(&input.email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(format!(
                "Email '{}' is already registered",
                input.email
            )));
        }

        let hashed_password = hash_password(&input.password).context("Failed to hash password")?;
        let user = User::new(input.username, hashed_password, input.full_name, input.email);

        // A concurrent registration can slip past the pre-check
        let created = self.user_repo.create(&user).await.map_err(|e| {
            if is_unique_violation(&e) {
                UserServiceError::UserExists(format!(
                    "Username '{}' or email '{}' is already taken",
                    user.username, user.email
                ))
            } else {
                UserServiceError::InternalError(e.context("Failed to create user"))
            }
        })?;

        tracing::info!(username = %created.username, "User registered");
        Ok(created)
    }

    /// Get user by username
    pub async fn get_user(&self, username: &str) -> Result<Option<User>, UserServiceError> {
        let user = self
            .user_repo
            .get_by_username(username)
            .await
            .context("Failed to get user by username")?;

        Ok(user)
    }
}

/// Validate registration input
fn validate_create_user_input(input: &CreateUserInput) -> Result<(), UserServiceError> {
    if input.username.is_empty() {
        return Err(UserServiceError::ValidationError(
            "Username cannot be empty".to_string(),
        ));
    }

    if !input.username.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(UserServiceError::ValidationError(
            "Username may only contain letters and digits".to_string(),
        ));
    }

    if input.username.len() > MAX_USERNAME_LENGTH {
        return Err(UserServiceError::ValidationError(format!(
            "Username must be at most {} characters",
            MAX_USERNAME_LENGTH
        )));
    }

    if input.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(UserServiceError::ValidationError(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    if input.full_name.trim().is_empty() {
        return Err(UserServiceError::ValidationError(
            "Full name cannot be empty".to_string(),
        ));
    }

    if input.full_name.chars().count() > MAX_TEXT_FIELD_LENGTH {
        return Err(UserServiceError::ValidationError(format!(
            "Full name must be at most {} characters",
            MAX_TEXT_FIELD_LENGTH
        )));
    }

    if input.email.trim().is_empty() {
        return Err(UserServiceError::ValidationError(
            "Email cannot be empty".to_string(),
        ));
    }

    if !input.email.contains('@') {
        return Err(UserServiceError::ValidationError(
            "Invalid email format".to_string(),
        ));
    }

    if input.email.chars().count() > MAX_TEXT_FIELD_LENGTH {
        return Err(UserServiceError::ValidationError(format!(
            "Email must be at most {} characters",
            MAX_TEXT_FIELD_LENGTH
        )));
    }

    Ok(())
}
