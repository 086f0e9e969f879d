//! API middleware
//!
//! Contains:
//! - Application state shared by handlers
//! - The `ApiError` response envelope
//! - The bearer-token authorization gate
//! - Extractors for the verified token payload and client details
//! - Request logging

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::services::{AuthService, AuthServiceError, ClientInfo, UserService, UserServiceError};
use crate::token::{DynTokenMaker, Payload, TokenMaker};

/// Only supported authorization scheme, compared case-insensitively
pub const AUTHORIZATION_TYPE_BEARER: &str = "bearer";

/// Longest client IP stored on a session, in characters
pub const MAX_CLIENT_IP_LENGTH: usize = 64;

/// Longest user agent stored on a session, in characters
pub const MAX_USER_AGENT_LENGTH: usize = 512;

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: crate::db::DynDatabasePool,
    pub user_service: Arc<UserService>,
    pub auth_service: Arc<AuthService>,
    pub token_maker: DynTokenMaker,
}

/// Verified access token payload, attached to the request by [`require_auth`]
#[derive(Debug, Clone)]
pub struct AuthPayload(pub Payload);

// ============================================================================
// Error envelope
// ============================================================================

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    /// HTTP status for this error's code
    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<AuthServiceError> for ApiError {
    fn from(err: AuthServiceError) -> Self {
        match err {
            AuthServiceError::UserNotFound(_) | AuthServiceError::SessionNotFound => {
                Self::not_found(err.to_string())
            }
            AuthServiceError::IncorrectPassword
            | AuthServiceError::SessionBlocked
            | AuthServiceError::SessionMismatch(_)
            | AuthServiceError::SessionExpired
            | AuthServiceError::InvalidRefreshToken(_) => Self::unauthorized(err.to_string()),
            AuthServiceError::SessionNotOwned => Self::forbidden(err.to_string()),
            AuthServiceError::CredentialLookup(_)
            | AuthServiceError::PasswordCheck(_)
            | AuthServiceError::TokenIssue(_)
            | AuthServiceError::SessionStore(_) => {
                tracing::error!(error = %err, "Authentication request failed");
                Self::internal_error("Internal server error")
            }
        }
    }
}

impl From<UserServiceError> for ApiError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::ValidationError(msg) => Self::validation_error(msg),
            UserServiceError::UserExists(msg) => Self::conflict(msg),
            UserServiceError::InternalError(e) => {
                tracing::error!(error = %format!("{:#}", e), "User request failed");
                Self::internal_error("Internal server error")
            }
        }
    }
}

// ============================================================================
// Authorization gate
// ============================================================================

/// Reasons a request is refused by the authorization gate.
///
/// All of them render as 401.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthHeaderError {
    #[error("authorization header is not provided")]
    MissingCredential,

    #[error("invalid authorization header format")]
    MalformedHeader,

    #[error("unsupported authorization type {0}")]
    UnsupportedScheme(String),

    #[error("invalid or expired access token")]
    Unauthorized,
}

impl From<AuthHeaderError> for ApiError {
    fn from(err: AuthHeaderError) -> Self {
        Self::unauthorized(err.to_string())
    }
}

/// Pull the bearer token out of an `Authorization` header value.
///
/// The value must split on whitespace into exactly two fields: the scheme
/// and the token.
pub fn parse_authorization_header(header: Option<&str>) -> Result<&str, AuthHeaderError> {
    let value = header
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AuthHeaderError::MissingCredential)?;

    let mut fields = value.split_whitespace();
    let (Some(scheme), Some(token), None) = (fields.next(), fields.next(), fields.next()) else {
        return Err(AuthHeaderError::MalformedHeader);
    };

    if !scheme.eq_ignore_ascii_case(AUTHORIZATION_TYPE_BEARER) {
        return Err(AuthHeaderError::UnsupportedScheme(scheme.to_string()));
    }

    Ok(token)
}

/// Parse the header and verify the token it carries.
///
/// Codec failures collapse into `Unauthorized`; the specific reason is only
/// logged.
pub fn authorize(maker: &dyn TokenMaker, header: Option<&str>) -> Result<Payload, AuthHeaderError> {
    let token = parse_authorization_header(header)?;

    maker.verify_token(token).map_err(|e| {
        tracing::debug!(reason = %e, "Access token rejected");
        AuthHeaderError::Unauthorized
    })
}

/// Authentication middleware
///
/// Stateless: the token is checked against the codec only, never against
/// the session store.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = match request.headers().get(header::AUTHORIZATION) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| AuthHeaderError::MalformedHeader)?,
        ),
        None => None,
    };

    let payload = authorize(state.token_maker.as_ref(), header).map_err(|e| {
        tracing::debug!(path = %request.uri().path(), error = %e, "Request refused");
        e
    })?;

    request.extensions_mut().insert(AuthPayload(payload));
    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for AuthPayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthPayload>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

// ============================================================================
// Client details
// ============================================================================

/// Client IP from proxy headers: first `X-Forwarded-For` entry, then
/// `X-Real-IP`.
fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    };

    forwarded.or_else(real_ip).map(String::from)
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Build [`ClientInfo`] from request headers, falling back to the peer
/// address when no proxy header is present.
///
/// Both values are cut to the width of their session columns.
pub fn client_info_from_headers(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientInfo {
    let client_ip = extract_ip_address(headers)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .map(|ip| truncate_chars(&ip, MAX_CLIENT_IP_LENGTH))
        .unwrap_or_default();

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(|ua| truncate_chars(ua, MAX_USER_AGENT_LENGTH))
        .unwrap_or_default();

    ClientInfo {
        client_ip,
        user_agent,
    }
}

fn peer_addr(extensions: &axum::http::Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(client_info_from_headers(
            &parts.headers,
            peer_addr(&parts.extensions),
        ))
    }
}

// ============================================================================
// Request logging
// ============================================================================

/// Request logging middleware
///
/// One event per request. Server errors log at error level, everything
/// else at info.
pub async fn request_log_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client = client_info_from_headers(request.headers(), peer_addr(request.extensions()));

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as u64;

    if response.status().is_server_error() {
        tracing::error!(
            %method,
            %path,
            client_ip = %client.client_ip,
            user_agent = %client.user_agent,
            status,
            latency_ms,
            "Request failed"
        );
    } else {
        tracing::info!(
            %method,
            %path,
            client_ip = %client.client_ip,
            user_agent = %client.user_agent,
            status,
            latency_ms,
            "Request completed"
        );
    }

    response
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any single-field header is malformed.
        #[test]
        fn prop_single_field_is_malformed(field in "[A-Za-z0-9._-]{1,40}") {
            prop_assert_eq!(
                parse_authorization_header(Some(&field)),
                Err(AuthHeaderError::MalformedHeader)
            );
        }

        /// Any scheme other than bearer is reported back as unsupported.
        #[test]
        fn prop_other_schemes_unsupported(
            scheme in "[A-Za-z]{1,12}",
            token in "[A-Za-z0-9._-]{1,40}",
        ) {
            prop_assume!(!scheme.eq_ignore_ascii_case(AUTHORIZATION_TYPE_BEARER));

            let header = format!("{} {}", scheme, token);
            prop_assert_eq!(
                parse_authorization_header(Some(&header)),
                Err(AuthHeaderError::UnsupportedScheme(scheme.clone()))
            );
        }

        /// A bearer header yields its token unchanged, whatever the casing
        /// and surrounding whitespace.
        #[test]
        fn prop_bearer_token_extracted(
            upper in proptest::collection::vec(any::<bool>(), 6),
            token in "[A-Za-z0-9._-]{1,80}",
            lead in "[ \t]{0,3}",
            gap in "[ \t]{1,3}",
        ) {
            let scheme: String = AUTHORIZATION_TYPE_BEARER
                .chars()
                .zip(upper)
                .map(|(c, up)| if up { c.to_ascii_uppercase() } else { c })
                .collect();
            let header = format!("{}{}{}{}", lead, scheme, gap, token);

            prop_assert_eq!(parse_authorization_header(Some(&header)), Ok(token.as_str()));
        }
    }
}
