//! User and session API endpoints
//!
//! Handles:
//! - Registration
//! - Login (issues an access token, a refresh token and a session)
//! - Access token renewal from a refresh token
//! - Current user lookup and session revocation (authenticated)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::middleware::{ApiError, AppState, AuthPayload};
use crate::models::{CreateUserInput, User};
use crate::services::{ClientInfo, LoginInput, LoginOutcome};

/// Routes reachable without a token
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/login", post(login_user))
        .route("/tokens/renew_access", post(renew_access_token))
}

/// Routes that sit behind the authorization gate
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(get_current_user))
        .route("/sessions/{id}/revoke", post(revoke_session))
}

/// Request body for registration
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub full_name: String,
    pub email: String,
}

impl From<CreateUserRequest> for CreateUserInput {
    fn from(req: CreateUserRequest) -> Self {
        Self {
            username: req.username,
            password: req.password,
            full_name: req.full_name,
            email: req.email,
        }
    }
}

/// Request body for login
#[derive(Debug, Deserialize)]
pub struct LoginUserRequest {
    pub username: String,
    pub password: String,
}

/// User summary returned to clients (never includes the password hash)
#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub password_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            username: user.username,
            full_name: user.full_name,
            email: user.email,
            password_changed_at: user.password_changed_at,
            created_at: user.created_at,
        }
    }
}

/// Response for a successful login
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginUserResponse {
    pub session_id: Uuid,
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

impl From<LoginOutcome> for LoginUserResponse {
    fn from(outcome: LoginOutcome) -> Self {
        Self {
            session_id: outcome.session.id,
            access_token: outcome.access_token,
            access_token_expires_at: outcome.access_payload.expired_at,
            refresh_token: outcome.refresh_token,
            refresh_token_expires_at: outcome.refresh_payload.expired_at,
            user: outcome.user.into(),
        }
    }
}

/// Request body for access token renewal
#[derive(Debug, Deserialize)]
pub struct RenewAccessTokenRequest {
    pub refresh_token: String,
}

/// Response for access token renewal
#[derive(Debug, Serialize, Deserialize)]
pub struct RenewAccessTokenResponse {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
}

/// POST /api/v1/users - Register a new user
async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.user_service.create_user(body.into()).await?;
    Ok(Json(user.into()))
}

/// POST /api/v1/users/login - Log in and open a session
async fn login_user(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(body): Json<LoginUserRequest>,
) -> Result<Json<LoginUserResponse>, ApiError> {
    let outcome = state
        .auth_service
        .login(LoginInput::new(body.username, body.password), client)
        .await?;

    Ok(Json(outcome.into()))
}

/// POST /api/v1/tokens/renew_access - Trade a refresh token for a new access token
async fn renew_access_token(
    State(state): State<AppState>,
    Json(body): Json<RenewAccessTokenRequest>,
) -> Result<Json<RenewAccessTokenResponse>, ApiError> {
    let renewed = state
        .auth_service
        .renew_access_token(&body.refresh_token)
        .await?;

    Ok(Json(RenewAccessTokenResponse {
        access_token: renewed.access_token,
        access_token_expires_at: renewed.access_payload.expired_at,
    }))
}

/// GET /api/v1/users/me - Current user
async fn get_current_user(
    State(state): State<AppState>,
    AuthPayload(payload): AuthPayload,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .user_service
        .get_user(&payload.username)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(user.into()))
}

/// POST /api/v1/sessions/{id}/revoke - Block one of the caller's sessions
async fn revoke_session(
    State(state): State<AppState>,
    AuthPayload(payload): AuthPayload,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .auth_service
        .revoke_session(id, &payload.username)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
