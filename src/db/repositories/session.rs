//! Session repository
//!
//! Database operations for refresh sessions.
//!
//! This module provides:
//! - `SessionRepository` trait defining the interface for session data access
//! - `SqlxSessionRepository` implementing the trait for SQLite and MySQL
//!
//! Sessions are written once at login and afterwards only ever flipped to
//! blocked. Expired rows are left in place; expiry alone makes them inert.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{CreateSessionInput, Session};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persist a new session
    async fn create(&self, input: &CreateSessionInput) -> Result<Session>;

    /// Get session by ID (the refresh token payload id)
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>>;

    /// Mark a session as blocked
    ///
    /// Returns `false` if no session with that id exists. Blocking an
    /// already blocked session succeeds.
    async fn set_blocked(&self, id: Uuid) -> Result<bool>;
}

/// SQLx-based session repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    /// Create a new SQLx session repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, input: &CreateSessionInput) -> Result<Session> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_session_sqlite(self.pool.sqlite()?, input).await,
            DatabaseDriver::Mysql => create_session_mysql(self.pool.mysql()?, input).await,
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_session_by_id_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => get_session_by_id_mysql(self.pool.mysql()?, id).await,
        }
    }

    async fn set_blocked(&self, id: Uuid) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => set_blocked_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => set_blocked_mysql(self.pool.mysql()?, id).await,
        }
    }
}

const INSERT_SESSION: &str = r#"
    INSERT INTO sessions (id, username, refresh_token, user_agent, client_ip, is_blocked, expires_at, created_at)
    VALUES (?, ?, ?, ?, ?, FALSE, ?, ?)
"#;

const SELECT_SESSION_BY_ID: &str = r#"
    SELECT id, username, refresh_token, user_agent, client_ip, is_blocked, expires_at, created_at
    FROM sessions
    WHERE id = ?
"#;

const BLOCK_SESSION: &str = "UPDATE sessions SET is_blocked = TRUE WHERE id = ?";

fn new_session(input: &CreateSessionInput) -> Session {
    Session {
        id: input.id,
        username: input.username.clone(),
        refresh_token: input.refresh_token.clone(),
        user_agent: input.user_agent.clone(),
        client_ip: input.client_ip.clone(),
        is_blocked: false,
        expires_at: input.expires_at,
        created_at: Utc::now(),
    }
}

fn parse_session_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid session id in database: {}", raw))
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_session_sqlite(pool: &SqlitePool, input: &CreateSessionInput) -> Result<Session> {
    let session = new_session(input);

    sqlx::query(INSERT_SESSION)
        .bind(session.id.to_string())
        .bind(&session.username)
        .bind(&session.refresh_token)
        .bind(&session.user_agent)
        .bind(&session.client_ip)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(pool)
        .await
        .context("Failed to create session")?;

    Ok(session)
}

async fn get_session_by_id_sqlite(pool: &SqlitePool, id: Uuid) -> Result<Option<Session>> {
    let row = sqlx::query(SELECT_SESSION_BY_ID)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .context("Failed to get session by ID")?;

    row.as_ref().map(row_to_session_sqlite).transpose()
}

async fn set_blocked_sqlite(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query(BLOCK_SESSION)
        .bind(id.to_string())
        .execute(pool)
        .await
        .context("Failed to block session")?;

    Ok(result.rows_affected() > 0)
}

fn row_to_session_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
    let id: String = row.try_get("id")?;

    Ok(Session {
        id: parse_session_id(&id)?,
        username: row.try_get("username")?,
        refresh_token: row.try_get("refresh_token")?,
        user_agent: row.try_get("user_agent")?,
        client_ip: row.try_get("client_ip")?,
        is_blocked: row.try_get("is_blocked")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_session_mysql(pool: &MySqlPool, input: &CreateSessionInput) -> Result<Session> {
    let session = new_session(input);

    sqlx::query(INSERT_SESSION)
        .bind(session.id.to_string())
        .bind(&session.username)
        .bind(&session.refresh_token)
        .bind(&session.user_agent)
        .bind(&session.client_ip)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(pool)
        .await
        .context("Failed to create session")?;

    Ok(session)
}

async fn get_session_by_id_mysql(pool: &MySqlPool, id: Uuid) -> Result<Option<Session>> {
    let row = sqlx::query(SELECT_SESSION_BY_ID)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .context("Failed to get session by ID")?;

    row.as_ref().map(row_to_session_mysql).transpose()
}

// MySQL reports rows *changed*, so re-blocking a blocked session reports 0;
// matched rows are checked with a follow-up lookup instead.
async fn set_blocked_mysql(pool: &MySqlPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query(BLOCK_SESSION)
        .bind(id.to_string())
        .execute(pool)
        .await
        .context("Failed to block session")?;

    if result.rows_affected() > 0 {
        return Ok(true);
    }

    Ok(get_session_by_id_mysql(pool, id).await?.is_some())
}

fn row_to_session_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Session> {
    let id: String = row.try_get("id")?;

    Ok(Session {
        id: parse_session_id(&id)?,
        username: row.try_get("username")?,
        refresh_token: row.try_get("refresh_token")?,
        user_agent: row.try_get("user_agent")?,
        client_ip: row.try_get("client_ip")?,
        is_blocked: row.try_get("is_blocked")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}
