//! Token payload

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TokenError;

/// Claims sealed inside a token.
///
/// The `id` of a refresh token doubles as the primary key of the session
/// record created for it, so it is random rather than sequential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Random unique identifier
    pub id: Uuid,
    /// Subject the token was issued to
    pub username: String,
    /// Issue timestamp
    pub issued_at: DateTime<Utc>,
    /// Expiry timestamp
    pub expired_at: DateTime<Utc>,
}

impl Payload {
    /// Build a fresh payload for `username` valid for `duration` from now.
    pub fn new(username: impl Into<String>, duration: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            issued_at: now,
            expired_at: now + duration,
        }
    }

    /// Check whether the payload has reached its expiry
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expired_at
    }

    /// Fail with `ExpiredToken` once the payload has expired
    pub fn valid(&self) -> Result<(), TokenError> {
        if self.is_expired() {
            return Err(TokenError::ExpiredToken);
        }
        Ok(())
    }
}
