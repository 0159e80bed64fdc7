// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Stored lowercased; lookups are case-insensitive
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    /// Argon2id PHC string, never serialized to clients
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Input for account creation
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

/// SHA-256 digest (hex) of a bearer token. Raw tokens are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenDigest(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token_digest: TokenDigest,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A freshly issued session together with the raw token handed to the client.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub session: Session,
    pub user: User,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing or invalid bearer token")]
    Unauthenticated,

    #[error("Session expired")]
    Expired,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Registration is disabled")]
    RegistrationDisabled,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),

    #[error("Repository error: {0}")]
    Repository(#[from] crate::domain::repository::RepositoryError),

    #[error("Password hashing failed: {0}")]
    Hashing(String),
}
