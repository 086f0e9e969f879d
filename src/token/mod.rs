//! Token codec
//!
//! Issues and verifies self-contained bearer tokens. A token carries a
//! [`Payload`] (identifier, subject, issued-at, expiry) sealed with a
//! symmetric AEAD key, so confidentiality and tamper evidence come from the
//! token itself and no server-side lookup is needed to verify it.
//!
//! The codec is exposed through the [`TokenMaker`] trait so that services
//! and the request gate depend on the contract rather than a concrete
//! scheme. [`PasetoMaker`] is the production implementation.
//!
//! # Usage
//!
//! ```ignore
//! use chrono::Duration;
//! use simplebank::token::{PasetoMaker, TokenMaker};
//!
//! let maker = PasetoMaker::new(b"0123456789abcdef0123456789abcdef")?;
//! let (token, payload) = maker.create_token("alice", Duration::minutes(15))?;
//! let verified = maker.verify_token(&token)?;
//! assert_eq!(verified.id, payload.id);
//! ```

mod paseto;
mod payload;

pub use paseto::{PasetoMaker, SYMMETRIC_KEY_SIZE, TOKEN_HEADER};
pub use payload::Payload;

use chrono::Duration;
use std::sync::Arc;

/// Errors raised while creating or verifying tokens
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// The configured symmetric key has the wrong length
    #[error("invalid key size: must be exactly {expected} bytes, got {actual}")]
    InvalidKeySize { expected: usize, actual: usize },

    /// Malformed, tampered with, or sealed under another key
    #[error("token is invalid")]
    InvalidToken,

    /// Authentic but past its expiry
    #[error("token has expired")]
    ExpiredToken,

    /// The payload could not be serialized
    #[error("failed to encode token payload: {0}")]
    Encoding(String),

    /// The AEAD cipher refused to seal the payload
    #[error("failed to encrypt token payload")]
    Encryption,
}

/// Contract for issuing and verifying access and refresh tokens.
///
/// Implementations hold only immutable key material and must be safe to
/// share across request tasks.
pub trait TokenMaker: Send + Sync {
    /// Create a token for `username` that expires after `duration`.
    ///
    /// Returns the opaque token string together with the payload sealed
    /// inside it.
    fn create_token(&self, username: &str, duration: Duration)
        -> Result<(String, Payload), TokenError>;

    /// Verify a token and return its payload.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` if the token is malformed or fails authentication
    /// - `ExpiredToken` if the payload is authentic but expired
    fn verify_token(&self, token: &str) -> Result<Payload, TokenError>;
}

/// Shared token maker handle
pub type DynTokenMaker = Arc<dyn TokenMaker>;
