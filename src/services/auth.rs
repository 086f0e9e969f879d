//! Authentication service
//!
//! Implements the session lifecycle:
//! - Login: verify credentials, mint an access and a refresh token, persist
//!   one session keyed by the refresh token id
//! - Refresh: redeem a refresh token for a new access token while its
//!   session is live
//! - Revocation: block a session so its refresh token stops working
//!
//! Access tokens are verified statelessly by the request gate and stay valid
//! until they expire; revocation only affects refresh redemption.

use crate::config::TokenConfig;
use crate::db::repositories::{SessionRepository, UserRepository};
use crate::models::{CreateSessionInput, Session, User};
use crate::services::password::{check_password, PasswordError};
use crate::token::{DynTokenMaker, Payload, TokenError};
use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

/// Error types for authentication operations
#[derive(Debug, thiserror::Error)]
pub enum AuthServiceError {
    /// No user with the given username
    #[error("user '{0}' not found")]
    UserNotFound(String),

    /// Password did not match the stored hash
    #[error("incorrect password")]
    IncorrectPassword,

    /// No session for the given id
    #[error("session not found")]
    SessionNotFound,

    /// Session has been revoked
    #[error("session is blocked")]
    SessionBlocked,

    /// Session does not belong to the presented refresh token
    #[error("session mismatch: {0}")]
    SessionMismatch(&'static str),

    /// Session has passed its expiry
    #[error("session has expired")]
    SessionExpired,

    /// Session belongs to another user
    #[error("session belongs to another user")]
    SessionNotOwned,

    /// Refresh token failed verification
    #[error("invalid refresh token: {0}")]
    InvalidRefreshToken(#[source] TokenError),

    /// Credential store failure
    #[error("failed to look up credentials: {0}")]
    CredentialLookup(#[source] anyhow::Error),

    /// Stored hash could not be checked
    #[error("failed to check password: {0}")]
    PasswordCheck(#[from] PasswordError),

    /// Token minting failure
    #[error("failed to issue token: {0}")]
    TokenIssue(#[source] TokenError),

    /// Session store failure
    #[error("session store failure: {0}")]
    SessionStore(#[source] anyhow::Error),
}

/// Lifetimes of the two token kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub access: Duration,
    pub refresh: Duration,
}

impl From<&TokenConfig> for TokenLifetimes {
    fn from(config: &TokenConfig) -> Self {
        Self {
            access: config.access_token_duration,
            refresh: config.refresh_token_duration,
        }
    }
}

/// Credentials submitted at login
#[derive(Debug, Clone)]
pub struct LoginInput {
    pub username: String,
    pub password: String,
}

impl LoginInput {
    /// Create a new login input
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Client metadata recorded on the session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub client_ip: String,
    pub user_agent: String,
}

/// Result of a successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session: Session,
    pub access_token: String,
    pub access_payload: Payload,
    pub refresh_token: String,
    pub refresh_payload: Payload,
    pub user: User,
}

/// Result of redeeming a refresh token
#[derive(Debug, Clone)]
pub struct RenewedAccess {
    pub access_token: String,
    pub access_payload: Payload,
}

/// Authentication service
pub struct AuthService {
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    token_maker: DynTokenMaker,
    lifetimes: TokenLifetimes,
}

impl AuthService {
    /// Create a new authentication service
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        token_maker: DynTokenMaker,
        lifetimes: TokenLifetimes,
    ) -> Self {
        Self {
            user_repo,
            session_repo,
            token_maker,
            lifetimes,
        }
    }

    /// Log a user in.
    ///
    /// On success exactly one session row has been written; on any failure
    /// none has.
    ///
    /// # Errors
    ///
    /// - `UserNotFound` if no user has that username
    /// - `IncorrectPassword` if the password does not match
    /// - `CredentialLookup`, `PasswordCheck`, `TokenIssue`, `SessionStore`
    ///   for internal failures
    pub async fn login(
        &self,
        input: LoginInput,
        client: ClientInfo,
    ) -> Result<LoginOutcome, AuthServiceError> {
        let user = match self.user_repo.get_by_username(&input.username).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::warn!(
                    username = %input.username,
                    client_ip = %client.client_ip,
                    "Login failed: unknown user"
                );
                return Err(AuthServiceError::UserNotFound(input.username));
            }
            Err(e) => return Err(AuthServiceError::CredentialLookup(e)),
        };

        if !check_password(&input.password, &user.hashed_password)? {
            tracing::warn!(
                username = %user.username,
                client_ip = %client.client_ip,
                "Login failed: incorrect password"
            );
            return Err(AuthServiceError::IncorrectPassword);
        }

        let (access_token, access_payload) = self
            .token_maker
            .create_token(&user.username, self.lifetimes.access)
            .map_err(AuthServiceError::TokenIssue)?;

        let (refresh_token, refresh_payload) = self
            .token_maker
            .create_token(&user.username, self.lifetimes.refresh)
            .map_err(AuthServiceError::TokenIssue)?;

        let session = self
            .session_repo
            .create(&CreateSessionInput {
                id: refresh_payload.id,
                username: user.username.clone(),
                refresh_token: refresh_token.clone(),
                user_agent: client.user_agent,
                client_ip: client.client_ip,
                expires_at: refresh_payload.expired_at,
            })
            .await
            .map_err(AuthServiceError::SessionStore)?;

        tracing::info!(
            username = %user.username,
            session_id = %session.id,
            client_ip = %session.client_ip,
            "User logged in"
        );

        Ok(LoginOutcome {
            session,
            access_token,
            access_payload,
            refresh_token,
            refresh_payload,
            user,
        })
    }

    /// Redeem a refresh token for a new access token.
    ///
    /// The session keyed by the token id must exist, be unblocked, belong to
    /// the token's subject, hold exactly this token and not have expired.
    pub async fn renew_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<RenewedAccess, AuthServiceError> {
        let refresh_payload = self
            .token_maker
            .verify_token(refresh_token)
            .map_err(AuthServiceError::InvalidRefreshToken)?;

        let session = self
            .session_repo
            .get_by_id(refresh_payload.id)
            .await
            .map_err(AuthServiceError::SessionStore)?
            .ok_or(AuthServiceError::SessionNotFound)?;

        if session.is_blocked {
            tracing::warn!(session_id = %session.id, "Refresh rejected: session blocked");
            return Err(AuthServiceError::SessionBlocked);
        }

        if session.username != refresh_payload.username {
            tracing::warn!(session_id = %session.id, "Refresh rejected: session user mismatch");
            return Err(AuthServiceError::SessionMismatch("incorrect session user"));
        }

        if session.refresh_token != refresh_token {
            tracing::warn!(session_id = %session.id, "Refresh rejected: session token mismatch");
            return Err(AuthServiceError::SessionMismatch("mismatched session token"));
        }

        if session.is_expired() {
            return Err(AuthServiceError::SessionExpired);
        }

        let (access_token, access_payload) = self
            .token_maker
            .create_token(&refresh_payload.username, self.lifetimes.access)
            .map_err(AuthServiceError::TokenIssue)?;

        tracing::debug!(session_id = %session.id, "Access token renewed");

        Ok(RenewedAccess {
            access_token,
            access_payload,
        })
    }

    /// Block a session owned by `requester`.
    ///
    /// Blocking is idempotent. Access tokens already issued for the session
    /// stay valid until they expire.
    pub async fn revoke_session(
        &self,
        session_id: Uuid,
        requester: &str,
    ) -> Result<(), AuthServiceError> {
        let session = self
            .session_repo
            .get_by_id(session_id)
            .await
            .map_err(AuthServiceError::SessionStore)?
            .ok_or(AuthServiceError::SessionNotFound)?;

        if session.username != requester {
            tracing::warn!(
                session_id = %session_id,
                requester = %requester,
                "Revocation rejected: session owned by another user"
            );
            return Err(AuthServiceError::SessionNotOwned);
        }

        let found = self
            .session_repo
            .set_blocked(session_id)
            .await
            .map_err(AuthServiceError::SessionStore)?;
        if !found {
            return Err(AuthServiceError::SessionNotFound);
        }

        tracing::info!(session_id = %session_id, username = %requester, "Session revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxSessionRepository, SqlxUserRepository};
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::services::password::hash_password;
    use crate::token::{PasetoMaker, TokenMaker};
    use async_trait::async_trait;
    use chrono::Utc;

    const TEST_KEY: &[u8; 32] = b"12345678901234567890123456789012";

    fn lifetimes() -> TokenLifetimes {
        TokenLifetimes {
            access: Duration::minutes(15),
            refresh: Duration::hours(24),
        }
    }

    fn client() -> ClientInfo {
        ClientInfo {
            client_ip: "203.0.113.7".to_string(),
            user_agent: "simplebank-tests/1.0".to_string(),
        }
    }

    async fn setup_pool() -> DynDatabasePool {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let user = User::new(
            "alice".to_string(),
            hash_password("secret123").unwrap(),
            "Alice Liddell".to_string(),
            "alice@example.com".to_string(),
        );
        SqlxUserRepository::new(pool.clone())
            .create(&user)
            .await
            .expect("Failed to create user");

        pool
    }

    fn service_with(
        pool: &DynDatabasePool,
        session_repo: Arc<dyn SessionRepository>,
        token_maker: DynTokenMaker,
    ) -> AuthService {
        AuthService::new(
            SqlxUserRepository::boxed(pool.clone()),
            session_repo,
            token_maker,
            lifetimes(),
        )
    }

    async fn setup_test_service() -> (DynDatabasePool, AuthService) {
        let pool = setup_pool().await;
        let service = service_with(
            &pool,
            SqlxSessionRepository::boxed(pool.clone()),
            Arc::new(PasetoMaker::new(TEST_KEY).unwrap()),
        );
        (pool, service)
    }

    async fn count_sessions(pool: &DynDatabasePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(pool.sqlite().unwrap())
            .await
            .unwrap()
    }

    struct FailingSessionRepository;

    #[async_trait]
    impl SessionRepository for FailingSessionRepository {
        async fn create(&self, _input: &CreateSessionInput) -> anyhow::Result<Session> {
            Err(anyhow::anyhow!("connection reset"))
        }

        async fn get_by_id(&self, _id: Uuid) -> anyhow::Result<Option<Session>> {
            Err(anyhow::anyhow!("connection reset"))
        }

        async fn set_blocked(&self, _id: Uuid) -> anyhow::Result<bool> {
            Err(anyhow::anyhow!("connection reset"))
        }
    }

    struct FailingTokenMaker;

    impl TokenMaker for FailingTokenMaker {
        fn create_token(&self, _username: &str, _duration: Duration) -> Result<(String, Payload), TokenError> {
            Err(TokenError::Encryption)
        }

        fn verify_token(&self, _token: &str) -> Result<Payload, TokenError> {
            Err(TokenError::InvalidToken)
        }
    }

    // ========================================================================
    // Login tests
    // ========================================================================

    #[tokio::test]
    async fn test_login_success() {
        let (pool, service) = setup_test_service().await;
        let before = Utc::now();

        let outcome = service
            .login(LoginInput::new("alice", "secret123"), client())
            .await
            .expect("Login should succeed");

        assert_eq!(count_sessions(&pool).await, 1);

        assert_eq!(outcome.user.username, "alice");
        assert_eq!(outcome.access_payload.username, "alice");
        assert_eq!(outcome.refresh_payload.username, "alice");
        assert_ne!(outcome.access_token, outcome.refresh_token);

        let access_ttl = outcome.access_payload.expired_at - before;
        assert!(access_ttl >= Duration::minutes(15) && access_ttl < Duration::minutes(15) + Duration::seconds(5));
        let refresh_ttl = outcome.refresh_payload.expired_at - before;
        assert!(refresh_ttl >= Duration::hours(24) && refresh_ttl < Duration::hours(24) + Duration::seconds(5));

        assert_eq!(outcome.session.id, outcome.refresh_payload.id);
        assert_eq!(outcome.session.refresh_token, outcome.refresh_token);
        assert_eq!(outcome.session.expires_at, outcome.refresh_payload.expired_at);
        assert_eq!(outcome.session.client_ip, "203.0.113.7");
        assert_eq!(outcome.session.user_agent, "simplebank-tests/1.0");
        assert!(!outcome.session.is_blocked);
    }

    #[tokio::test]
    async fn test_login_tokens_verify() {
        let (_pool, service) = setup_test_service().await;
        let maker = PasetoMaker::new(TEST_KEY).unwrap();

        let outcome = service
            .login(LoginInput::new("alice", "secret123"), client())
            .await
            .unwrap();

        let access = maker.verify_token(&outcome.access_token).unwrap();
        assert_eq!(access, outcome.access_payload);
        let refresh = maker.verify_token(&outcome.refresh_token).unwrap();
        assert_eq!(refresh, outcome.refresh_payload);
    }

    #[tokio::test]
    async fn test_each_login_creates_its_own_session() {
        let (pool, service) = setup_test_service().await;

        let first = service.login(LoginInput::new("alice", "secret123"), client()).await.unwrap();
        let second = service.login(LoginInput::new("alice", "secret123"), client()).await.unwrap();

        assert_ne!(first.session.id, second.session.id);
        assert_eq!(count_sessions(&pool).await, 2);
    }

    #[tokio::test]
    async fn test_login_unknown_user() {
        let (pool, service) = setup_test_service().await;

        let result = service
            .login(LoginInput::new("mallory", "secret123"), client())
            .await;

        assert!(matches!(result, Err(AuthServiceError::UserNotFound(ref name)) if name == "mallory"));
        assert_eq!(count_sessions(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let (pool, service) = setup_test_service().await;

        let result = service
            .login(LoginInput::new("alice", "wrong-password"), client())
            .await;

        assert!(matches!(result, Err(AuthServiceError::IncorrectPassword)));
        assert_eq!(count_sessions(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_login_malformed_stored_hash() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let user = User::new(
            "bob".to_string(),
            "plaintext".to_string(),
            "Bob".to_string(),
            "bob@example.com".to_string(),
        );
        SqlxUserRepository::new(pool.clone()).create(&user).await.unwrap();

        let service = service_with(
            &pool,
            SqlxSessionRepository::boxed(pool.clone()),
            Arc::new(PasetoMaker::new(TEST_KEY).unwrap()),
        );
        let result = service.login(LoginInput::new("bob", "plaintext"), client()).await;

        assert!(matches!(result, Err(AuthServiceError::PasswordCheck(_))));
        assert_eq!(count_sessions(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_login_session_store_failure() {
        let pool = setup_pool().await;
        let service = service_with(
            &pool,
            Arc::new(FailingSessionRepository),
            Arc::new(PasetoMaker::new(TEST_KEY).unwrap()),
        );

        let result = service.login(LoginInput::new("alice", "secret123"), client()).await;

        assert!(matches!(result, Err(AuthServiceError::SessionStore(_))));
        assert_eq!(count_sessions(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_login_token_issue_failure() {
        let pool = setup_pool().await;
        let service = service_with(
            &pool,
            SqlxSessionRepository::boxed(pool.clone()),
            Arc::new(FailingTokenMaker),
        );

        let result = service.login(LoginInput::new("alice", "secret123"), client()).await;

        assert!(matches!(result, Err(AuthServiceError::TokenIssue(TokenError::Encryption))));
        assert_eq!(count_sessions(&pool).await, 0);
    }

    // ========================================================================
    // Refresh tests
    // ========================================================================

    #[tokio::test]
    async fn test_renew_access_token() {
        let (_pool, service) = setup_test_service().await;
        let outcome = service.login(LoginInput::new("alice", "secret123"), client()).await.unwrap();

        let renewed = service
            .renew_access_token(&outcome.refresh_token)
            .await
            .expect("Renewal should succeed");

        assert_eq!(renewed.access_payload.username, "alice");
        assert_ne!(renewed.access_token, outcome.access_token);
        assert_ne!(renewed.access_payload.id, outcome.session.id);
    }

    #[tokio::test]
    async fn test_renew_with_invalid_token() {
        let (_pool, service) = setup_test_service().await;

        let result = service.renew_access_token("v2.local.garbage").await;
        assert!(matches!(
            result,
            Err(AuthServiceError::InvalidRefreshToken(TokenError::InvalidToken))
        ));
    }

    #[tokio::test]
    async fn test_renew_with_access_token_has_no_session() {
        let (_pool, service) = setup_test_service().await;
        let outcome = service.login(LoginInput::new("alice", "secret123"), client()).await.unwrap();

        let result = service.renew_access_token(&outcome.access_token).await;
        assert!(matches!(result, Err(AuthServiceError::SessionNotFound)));
    }

    #[tokio::test]
    async fn test_renew_blocked_session() {
        let (_pool, service) = setup_test_service().await;
        let outcome = service.login(LoginInput::new("alice", "secret123"), client()).await.unwrap();

        service.revoke_session(outcome.session.id, "alice").await.unwrap();

        let result = service.renew_access_token(&outcome.refresh_token).await;
        assert!(matches!(result, Err(AuthServiceError::SessionBlocked)));
    }

    #[tokio::test]
    async fn test_renew_mismatched_session_token() {
        let (pool, service) = setup_test_service().await;
        let outcome = service.login(LoginInput::new("alice", "secret123"), client()).await.unwrap();

        sqlx::query("UPDATE sessions SET refresh_token = 'v2.local.other' WHERE id = ?")
            .bind(outcome.session.id.to_string())
            .execute(pool.sqlite().unwrap())
            .await
            .unwrap();

        let result = service.renew_access_token(&outcome.refresh_token).await;
        assert!(matches!(result, Err(AuthServiceError::SessionMismatch(_))));
    }

    #[tokio::test]
    async fn test_renew_expired_session() {
        let (pool, service) = setup_test_service().await;
        let outcome = service.login(LoginInput::new("alice", "secret123"), client()).await.unwrap();

        sqlx::query("UPDATE sessions SET expires_at = ? WHERE id = ?")
            .bind(Utc::now() - Duration::minutes(1))
            .bind(outcome.session.id.to_string())
            .execute(pool.sqlite().unwrap())
            .await
            .unwrap();

        let result = service.renew_access_token(&outcome.refresh_token).await;
        assert!(matches!(result, Err(AuthServiceError::SessionExpired)));
    }

    #[tokio::test]
    async fn test_renew_expired_refresh_token() {
        let pool = setup_pool().await;
        let service = AuthService::new(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool.clone()),
            Arc::new(PasetoMaker::new(TEST_KEY).unwrap()),
            TokenLifetimes {
                access: Duration::minutes(15),
                refresh: -Duration::seconds(1),
            },
        );
        let outcome = service.login(LoginInput::new("alice", "secret123"), client()).await.unwrap();

        let result = service.renew_access_token(&outcome.refresh_token).await;
        assert!(matches!(
            result,
            Err(AuthServiceError::InvalidRefreshToken(TokenError::ExpiredToken))
        ));
    }

    // ========================================================================
    // Revocation tests
    // ========================================================================

    #[tokio::test]
    async fn test_revoke_session_is_idempotent() {
        let (_pool, service) = setup_test_service().await;
        let outcome = service.login(LoginInput::new("alice", "secret123"), client()).await.unwrap();

        service.revoke_session(outcome.session.id, "alice").await.unwrap();
        service.revoke_session(outcome.session.id, "alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_revoke_session_of_another_user() {
        let (_pool, service) = setup_test_service().await;
        let outcome = service.login(LoginInput::new("alice", "secret123"), client()).await.unwrap();

        let result = service.revoke_session(outcome.session.id, "mallory").await;
        assert!(matches!(result, Err(AuthServiceError::SessionNotOwned)));

        // Still usable by its owner
        assert!(service.renew_access_token(&outcome.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_revoke_unknown_session() {
        let (_pool, service) = setup_test_service().await;

        let result = service.revoke_session(Uuid::new_v4(), "alice").await;
        assert!(matches!(result, Err(AuthServiceError::SessionNotFound)));
    }

    #[test]
    fn test_lifetimes_from_config() {
        let config = TokenConfig::default();
        let lifetimes = TokenLifetimes::from(&config);

        assert_eq!(lifetimes.access, Duration::minutes(15));
        assert_eq!(lifetimes.refresh, Duration::hours(24));
    }
}
