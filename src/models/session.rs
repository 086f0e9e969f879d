//! Session model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Refresh session created on login.
///
/// Keyed by the id of the refresh token payload. The only mutation after
/// creation is setting `is_blocked`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session ID, equal to the refresh token payload id
    pub id: Uuid,
    /// Owning username
    pub username: String,
    /// Refresh token issued with this session
    #[serde(skip_serializing)]
    pub refresh_token: String,
    /// Client user agent at login
    pub user_agent: String,
    /// Client IP at login
    pub client_ip: String,
    /// Set when the session has been revoked
    pub is_blocked: bool,
    /// Expiration timestamp, equal to the refresh token expiry
    pub expires_at: DateTime<Utc>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Input for persisting a new session
#[derive(Debug, Clone)]
pub struct CreateSessionInput {
    pub id: Uuid,
    pub username: String,
    pub refresh_token: String,
    pub user_agent: String,
    pub client_ip: String,
    pub expires_at: DateTime<Utc>,
}
