// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! SQLite-backed user and session repositories.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::domain::repository::{RepositoryError, SessionRepository, UserRepository};
use crate::domain::user::{Session, TokenDigest, User, UserId};
use crate::infrastructure::db::Database;

const USER_COLUMNS: &str = "id, email, username, first_name, last_name, password_hash, created_at";

pub struct SqliteUserRepository {
    db: Database,
}

impl SqliteUserRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Corrupt(format!("{}: {}", what, err))
}

fn row_to_user(row: &SqliteRow) -> Result<User, RepositoryError> {
    let id: String = row.try_get("id")?;
    Ok(User {
        id: UserId::from_string(&id).map_err(|e| corrupt("user id", e))?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(&format!(
            "INSERT INTO users ({USER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .execute(self.db.get_pool())
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(self.db.get_pool())
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        // email column is COLLATE NOCASE
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(email)
            .fetch_optional(self.db.get_pool())
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(self.db.get_pool())
            .await?;
        Ok(count.max(0) as u64)
    }
}

pub struct SqliteSessionRepository {
    db: Database,
}

impl SqliteSessionRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn row_to_session(row: &SqliteRow) -> Result<Session, RepositoryError> {
    let user_id: String = row.try_get("user_id")?;
    let expires_at_ms: i64 = row.try_get("expires_at_ms")?;
    Ok(Session {
        token_digest: TokenDigest(row.try_get("token_digest")?),
        user_id: UserId::from_string(&user_id).map_err(|e| corrupt("session user_id", e))?,
        created_at: row.try_get("created_at")?,
        expires_at: Utc
            .timestamp_millis_opt(expires_at_ms)
            .single()
            .ok_or_else(|| corrupt("session expires_at_ms", expires_at_ms))?,
    })
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO sessions (token_digest, user_id, created_at, expires_at_ms) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(token_digest) DO UPDATE SET expires_at_ms = excluded.expires_at_ms",
        )
        .bind(&session.token_digest.0)
        .bind(session.user_id.to_string())
        .bind(session.created_at)
        .bind(session.expires_at.timestamp_millis())
        .execute(self.db.get_pool())
        .await?;
        Ok(())
    }

    async fn find(&self, digest: &TokenDigest) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(
            "SELECT token_digest, user_id, created_at, expires_at_ms FROM sessions WHERE token_digest = ?",
        )
        .bind(&digest.0)
        .fetch_optional(self.db.get_pool())
        .await?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn delete(&self, digest: &TokenDigest) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM sessions WHERE token_digest = ?")
            .bind(&digest.0)
            .execute(self.db.get_pool())
            .await?;
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at_ms <= ?")
            .bind(now.timestamp_millis())
            .execute(self.db.get_pool())
            .await?;
        Ok(result.rows_affected())
    }
}
