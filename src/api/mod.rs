//! API layer - HTTP handlers and routing
//!
//! This module contains the HTTP surface of the simplebank server:
//! - User registration and login
//! - Access token renewal
//! - Authenticated user and session endpoints
//! - Health check

pub mod middleware;
pub mod users;

use anyhow::Context;
use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Json, Router,
};
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer};

pub use middleware::{
    authorize, parse_authorization_header, ApiError, AppState, AuthHeaderError, AuthPayload,
};

/// Build the main API router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Protected routes (need a valid access token)
    let protected_routes = users::protected_router().route_layer(
        axum_middleware::from_fn_with_state(state, middleware::require_auth),
    );

    // Public routes
    Router::new()
        .route("/health", get(health))
        .merge(users::public_router())
        .merge(protected_routes)
}

/// Build the complete router with middleware
///
/// Fails if `cors_origin` is not a valid header value.
pub fn build_router(state: AppState, cors_origin: &str) -> anyhow::Result<Router> {
    let origin = cors_origin
        .parse::<HeaderValue>()
        .with_context(|| format!("Invalid CORS origin: {}", cors_origin))?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Ok(Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .layer(cors)
        .layer(CatchPanicLayer::new())
        // Request logging (outermost layer, runs for all requests)
        .layer(axum_middleware::from_fn(middleware::request_log_middleware))
        .with_state(state))
}

/// GET /api/v1/health - Database liveness
async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    state.pool.ping().await.map_err(|e| {
        tracing::error!(error = %format!("{:#}", e), "Health check failed");
        ApiError::internal_error("Database unavailable")
    })?;

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxSessionRepository, SqlxUserRepository};
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::services::{AuthService, TokenLifetimes, UserService};
    use crate::token::{DynTokenMaker, PasetoMaker, SYMMETRIC_KEY_SIZE};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use chrono::Duration;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        pool: DynDatabasePool,
        token_maker: DynTokenMaker,
    }

    async fn setup_test_app() -> TestApp {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let token_maker: DynTokenMaker =
            Arc::new(PasetoMaker::new(&[9u8; SYMMETRIC_KEY_SIZE]).unwrap());
        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let session_repo = SqlxSessionRepository::boxed(pool.clone());

        let state = AppState {
            pool: pool.clone(),
            user_service: Arc::new(UserService::new(user_repo.clone())),
            auth_service: Arc::new(AuthService::new(
                user_repo,
                session_repo,
                token_maker.clone(),
                TokenLifetimes {
                    access: Duration::minutes(15),
                    refresh: Duration::hours(24),
                },
            )),
            token_maker: token_maker.clone(),
        };

        TestApp {
            router: build_router(state, "http://localhost:3000").unwrap(),
            pool,
            token_maker,
        }
    }

    async fn send(app: &TestApp, request: Request<Body>) -> Response {
        app.router.clone().oneshot(request).await.unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, "router-test")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_with_auth(uri: &str, authorization: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn count_sessions(pool: &DynDatabasePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(pool.sqlite().unwrap())
            .await
            .unwrap()
    }

    async fn register(app: &TestApp, username: &str) {
        let response = send(
            app,
            post_json(
                "/api/v1/users",
                json!({
                    "username": username,
                    "password": "secret123",
                    "full_name": "Test User",
                    "email": format!("{}@example.com", username),
                }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    async fn login(app: &TestApp, username: &str) -> Value {
        let response = send(
            app,
            post_json(
                "/api/v1/users/login",
                json!({ "username": username, "password": "secret123" }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await
    }

    #[tokio::test]
    async fn test_health() {
        let app = setup_test_app().await;
        let response = send(&app, get_with_auth("/api/v1/health", None)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_register_hides_hash() {
        let app = setup_test_app().await;
        let response = send(
            &app,
            post_json(
                "/api/v1/users",
                json!({
                    "username": "alice",
                    "password": "secret123",
                    "full_name": "Alice",
                    "email": "alice@example.com",
                }),
            ),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["username"], "alice");
        assert!(body.get("hashed_password").is_none());
    }

    #[tokio::test]
    async fn test_register_conflict_and_validation() {
        let app = setup_test_app().await;
        register(&app, "alice").await;

        let duplicate = send(
            &app,
            post_json(
                "/api/v1/users",
                json!({
                    "username": "alice",
                    "password": "secret123",
                    "full_name": "Other",
                    "email": "other@example.com",
                }),
            ),
        )
        .await;
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(duplicate).await["error"]["code"], "CONFLICT");

        let invalid = send(
            &app,
            post_json(
                "/api/v1/users",
                json!({
                    "username": "bob",
                    "password": "123",
                    "full_name": "Bob",
                    "email": "bob@example.com",
                }),
            ),
        )
        .await;
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_creates_session() {
        let app = setup_test_app().await;
        register(&app, "alice").await;

        let body = login(&app, "alice").await;

        assert_eq!(count_sessions(&app.pool).await, 1);
        assert_eq!(body["user"]["username"], "alice");
        assert!(body["user"].get("hashed_password").is_none());

        let refresh = app
            .token_maker
            .verify_token(body["refresh_token"].as_str().unwrap())
            .unwrap();
        assert_eq!(body["session_id"], refresh.id.to_string());

        let (client_ip, user_agent): (String, String) =
            sqlx::query_as("SELECT client_ip, user_agent FROM sessions")
                .fetch_one(app.pool.sqlite().unwrap())
                .await
                .unwrap();
        assert_eq!(client_ip, "203.0.113.9");
        assert_eq!(user_agent, "router-test");
    }

    #[tokio::test]
    async fn test_login_failures() {
        let app = setup_test_app().await;
        register(&app, "alice").await;

        let unknown = send(
            &app,
            post_json(
                "/api/v1/users/login",
                json!({ "username": "nobody", "password": "secret123" }),
            ),
        )
        .await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let wrong = send(
            &app,
            post_json(
                "/api/v1/users/login",
                json!({ "username": "alice", "password": "wrong-password" }),
            ),
        )
        .await;
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(count_sessions(&app.pool).await, 0);
    }

    #[tokio::test]
    async fn test_me_requires_token() {
        let app = setup_test_app().await;

        for authorization in [None, Some("Bearer"), Some("Basic abc123"), Some("Bearer nope")] {
            let response = send(&app, get_with_auth("/api/v1/users/me", authorization)).await;
            assert_eq!(
                response.status(),
                StatusCode::UNAUTHORIZED,
                "{:?}",
                authorization
            );
            assert_eq!(body_json(response).await["error"]["code"], "UNAUTHORIZED");
        }
    }

    #[tokio::test]
    async fn test_me_with_access_token() {
        let app = setup_test_app().await;
        register(&app, "alice").await;
        let body = login(&app, "alice").await;

        let authorization = format!("bearer {}", body["access_token"].as_str().unwrap());
        let response = send(
            &app,
            get_with_auth("/api/v1/users/me", Some(&authorization)),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["email"], "alice@example.com");
    }

    #[tokio::test]
    async fn test_me_with_expired_token() {
        let app = setup_test_app().await;
        register(&app, "alice").await;

        let (token, _) = app
            .token_maker
            .create_token("alice", -Duration::minutes(1))
            .unwrap();
        let authorization = format!("Bearer {}", token);
        let response = send(
            &app,
            get_with_auth("/api/v1/users/me", Some(&authorization)),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_renew_then_revoke() {
        let app = setup_test_app().await;
        register(&app, "alice").await;
        let body = login(&app, "alice").await;
        let refresh_token = body["refresh_token"].as_str().unwrap().to_string();
        let access_token = body["access_token"].as_str().unwrap().to_string();
        let session_id = body["session_id"].as_str().unwrap().to_string();

        let renewed = send(
            &app,
            post_json(
                "/api/v1/tokens/renew_access",
                json!({ "refresh_token": refresh_token }),
            ),
        )
        .await;
        assert_eq!(renewed.status(), StatusCode::OK);
        let renewed = body_json(renewed).await;
        let new_access = app
            .token_maker
            .verify_token(renewed["access_token"].as_str().unwrap())
            .unwrap();
        assert_eq!(new_access.username, "alice");

        let revoke = Request::builder()
            .method("POST")
            .uri(format!("/api/v1/sessions/{}/revoke", session_id))
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, revoke).await.status(), StatusCode::NO_CONTENT);

        let refused = send(
            &app,
            post_json(
                "/api/v1/tokens/renew_access",
                json!({ "refresh_token": refresh_token }),
            ),
        )
        .await;
        assert_eq!(refused.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_revoke_someone_elses_session() {
        let app = setup_test_app().await;
        register(&app, "alice").await;
        register(&app, "bob").await;
        let alice = login(&app, "alice").await;
        let bob = login(&app, "bob").await;

        let revoke = Request::builder()
            .method("POST")
            .uri(format!(
                "/api/v1/sessions/{}/revoke",
                alice["session_id"].as_str().unwrap()
            ))
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", bob["access_token"].as_str().unwrap()),
            )
            .body(Body::empty())
            .unwrap();

        assert_eq!(send(&app, revoke).await.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_renew_with_garbage_token() {
        let app = setup_test_app().await;
        let response = send(
            &app,
            post_json(
                "/api/v1/tokens/renew_access",
                json!({ "refresh_token": "v2.local.garbage" }),
            ),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_cors_origin() {
        let app = setup_test_app().await;
        let pool = app.pool.clone();
        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let state = AppState {
            pool: pool.clone(),
            user_service: Arc::new(UserService::new(user_repo.clone())),
            auth_service: Arc::new(AuthService::new(
                user_repo,
                SqlxSessionRepository::boxed(pool),
                app.token_maker.clone(),
                TokenLifetimes {
                    access: Duration::minutes(15),
                    refresh: Duration::hours(24),
                },
            )),
            token_maker: app.token_maker.clone(),
        };

        assert!(build_router(state, "bad\norigin").is_err());
    }
}
