//! User model
//!
//! Credentials record for a bank customer. The username is the primary key
//! and the subject of every token issued to the user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User entity representing a registered customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Username (primary key)
    pub username: String,
    /// Password hash (argon2)
    #[serde(skip_serializing)]
    pub hashed_password: String,
    /// Display name
    pub full_name: String,
    /// Email address (unique)
    pub email: String,
    /// Last password change; the Unix epoch until the first change
    pub password_changed_at: DateTime<Utc>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new User with the given parameters.
    ///
    /// Note: The password should already be hashed before calling this function.
    /// Use `services::password::hash_password()` to hash the password.
    pub fn new(
        username: String,
        hashed_password: String,
        full_name: String,
        email: String,
    ) -> Self {
        Self {
            username,
            hashed_password,
            full_name,
            email,
            password_changed_at: DateTime::<Utc>::default(), // Unix epoch
            created_at: Utc::now(),
        }
    }
}

/// Input for creating a new user (before password hashing)
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserInput {
    /// Username, ASCII letters and digits only
    pub username: String,
    /// Plaintext password (will be hashed)
    pub password: String,
    /// Display name
    pub full_name: String,
    /// Email address
    pub email: String,
}
