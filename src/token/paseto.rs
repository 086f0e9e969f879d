//! PASETO v2.local tokens
//!
//! The payload is serialized as JSON and sealed with the PASETO v2 local
//! construction (XChaCha20-Poly1305 with a BLAKE2b-derived nonce and
//! pre-authentication encoding of the header and footer). Tokens interoperate
//! with any PASETO v2 implementation holding the same key.

use chrono::Duration;
use rand::RngCore;
use rusty_paseto::core::{
    Footer, Key, Local, Paseto, PasetoNonce, PasetoSymmetricKey, Payload as PasetoPayload, V2,
};
use std::fmt;

use super::{Payload, TokenError, TokenMaker};

/// Required symmetric key length in bytes
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Version and purpose prefix of every token
pub const TOKEN_HEADER: &str = "v2.local.";

const NONCE_SIZE: usize = 24;

/// Token maker sealing payloads with a single symmetric key
pub struct PasetoMaker {
    key: PasetoSymmetricKey<V2, Local>,
}

impl PasetoMaker {
    /// Create a maker from raw key material.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKeySize` unless the key is exactly
    /// [`SYMMETRIC_KEY_SIZE`] bytes long. Callers should construct the maker
    /// at startup so a misconfigured key is fatal before serving requests.
    pub fn new(symmetric_key: &[u8]) -> Result<Self, TokenError> {
        let bytes: [u8; SYMMETRIC_KEY_SIZE] =
            symmetric_key
                .try_into()
                .map_err(|_| TokenError::InvalidKeySize {
                    expected: SYMMETRIC_KEY_SIZE,
                    actual: symmetric_key.len(),
                })?;

        Ok(Self {
            key: PasetoSymmetricKey::<V2, Local>::from(Key::<SYMMETRIC_KEY_SIZE>::from(bytes)),
        })
    }
}

impl fmt::Debug for PasetoMaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasetoMaker").finish_non_exhaustive()
    }
}

impl TokenMaker for PasetoMaker {
    fn create_token(
        &self,
        username: &str,
        duration: Duration,
    ) -> Result<(String, Payload), TokenError> {
        let payload = Payload::new(username, duration);
        let message =
            serde_json::to_string(&payload).map_err(|e| TokenError::Encoding(e.to_string()))?;

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce = Key::<NONCE_SIZE>::from(nonce);

        let token = Paseto::<V2, Local>::builder()
            .set_payload(PasetoPayload::from(message.as_str()))
            .try_encrypt(&self.key, &PasetoNonce::<V2, Local>::from(&nonce))
            .map_err(|e| {
                tracing::error!(error = %e, "PASETO encryption failed");
                TokenError::Encryption
            })?;

        Ok((token, payload))
    }

    fn verify_token(&self, token: &str) -> Result<Payload, TokenError> {
        let message = Paseto::<V2, Local>::try_decrypt(token, &self.key, None::<Footer>)
            .map_err(|_| TokenError::InvalidToken)?;

        let payload: Payload =
            serde_json::from_str(&message).map_err(|_| TokenError::InvalidToken)?;

        payload.valid()?;
        Ok(payload)
    }
}
