// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts, one per aggregate, defined in the domain layer and
//! implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `InstallationRepository` | `ServiceInstallation` | `InMemoryInstallationRepository`, `SqliteInstallationRepository` |
//! | `UserRepository` | `User` | `InMemoryUserRepository`, `SqliteUserRepository` |
//! | `SessionRepository` | `Session` | `InMemorySessionRepository`, `SqliteSessionRepository` |
//!
//! ## Storage Backend Abstraction
//!
//! The concrete backend is selected at startup from `spec.storage` in the
//! configuration manifest. In-memory implementations serve development and
//! tests; SQLite implementations persist across restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::domain::catalog::ServiceKey;
use crate::domain::installation::{ServiceInstallation, Transition, TransitionError};
use crate::domain::user::{Session, TokenDigest, User, UserId};

/// Repository interface for installation state
///
/// The single mutable shared resource of the system. All state changes go
/// through [`InstallationRepository::transition`], which must be atomic with
/// respect to concurrent callers for the same key.
#[async_trait]
pub trait InstallationRepository: Send + Sync {
    /// Current record for `key`; an implicit `NotInstalled` record when none exists
    async fn get(&self, key: &ServiceKey) -> Result<ServiceInstallation, RepositoryError>;

    /// Every recorded installation, keyed by service
    async fn list(&self) -> Result<BTreeMap<ServiceKey, ServiceInstallation>, RepositoryError>;

    /// Compare-and-swap the state of `key`.
    ///
    /// Fails with [`RepositoryError::Conflict`] when the current state (or
    /// attempt, for fenced transitions) does not satisfy the guard.
    async fn transition(
        &self,
        key: &ServiceKey,
        transition: &Transition,
    ) -> Result<ServiceInstallation, RepositoryError>;
}

/// Repository interface for user accounts
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user; fails with `Duplicate` on email/username clash
    async fn create(&self, user: &User) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    /// Case-insensitive lookup
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    async fn count(&self) -> Result<u64, RepositoryError>;
}

/// Repository interface for bearer sessions
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn save(&self, session: &Session) -> Result<(), RepositoryError>;

    async fn find(&self, digest: &TokenDigest) -> Result<Option<Session>, RepositoryError>;

    async fn delete(&self, digest: &TokenDigest) -> Result<(), RepositoryError>;

    /// Evict sessions expired at `now`; returns how many were removed
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Conflict(#[from] TransitionError),

    #[error("Duplicate entity: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Duplicate(db.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}
