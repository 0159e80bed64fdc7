// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository abstractions defined in
//! the domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve domain aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## SQLite Repositories
//!
//! - **SqliteInstallationRepository** - installation state, CAS transitions
//! - **SqliteUserRepository** - user accounts
//! - **SqliteSessionRepository** - bearer sessions
//!
//! ## In-Memory Repositories
//!
//! Lightweight implementations for tests and throwaway nodes:
//! - **InMemoryInstallationRepository**
//! - **InMemoryUserRepository**
//! - **InMemorySessionRepository**
//!
//! # Design Principles
//!
//! 1. **Technology Agnostic**: Domain layer has no knowledge of persistence
//! 2. **Atomic Transitions**: Guard check and write happen under one lock or one statement
//! 3. **Error Mapping**: Infrastructure errors mapped to domain RepositoryError

pub mod sqlite_installation;
pub mod sqlite_user;

pub use sqlite_installation::SqliteInstallationRepository;
pub use sqlite_user::{SqliteSessionRepository, SqliteUserRepository};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::domain::catalog::ServiceKey;
use crate::domain::installation::{ServiceInstallation, Transition, TransitionError};
use crate::domain::repository::{
    InstallationRepository, RepositoryError, SessionRepository, UserRepository,
};
use crate::domain::user::{Session, TokenDigest, User, UserId};

#[derive(Clone, Default)]
pub struct InMemoryInstallationRepository {
    installations: Arc<RwLock<HashMap<ServiceKey, ServiceInstallation>>>,
}

impl InMemoryInstallationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstallationRepository for InMemoryInstallationRepository {
    async fn get(&self, key: &ServiceKey) -> Result<ServiceInstallation, RepositoryError> {
        let installations = self.installations.read();
        Ok(installations
            .get(key)
            .cloned()
            .unwrap_or_else(|| ServiceInstallation::not_installed(key.clone())))
    }

    async fn list(&self) -> Result<BTreeMap<ServiceKey, ServiceInstallation>, RepositoryError> {
        let installations = self.installations.read();
        Ok(installations
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn transition(
        &self,
        key: &ServiceKey,
        transition: &Transition,
    ) -> Result<ServiceInstallation, RepositoryError> {
        let mut installations = self.installations.write();
        let mut row = installations
            .get(key)
            .cloned()
            .unwrap_or_else(|| ServiceInstallation::not_installed(key.clone()));

        if !transition.permits(row.state, row.attempt) {
            return Err(TransitionError::Conflict {
                key: key.to_string(),
                current: row.state,
                attempt: row.attempt,
                requested: transition.to,
            }
            .into());
        }

        row.apply(transition, Utc::now());
        installations.insert(key.clone(), row.clone());
        Ok(row)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryUserRepository {
    users: Arc<RwLock<HashMap<UserId, User>>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, user: &User) -> Result<(), RepositoryError> {
        let mut users = self.users.write();
        if users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(RepositoryError::Duplicate(format!("email {}", user.email)));
        }
        if users.values().any(|u| u.username == user.username) {
            return Err(RepositoryError::Duplicate(format!("username {}", user.username)));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.read().get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read();
        Ok(users.values().find(|u| u.email.eq_ignore_ascii_case(email)).cloned())
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(self.users.read().len() as u64)
    }
}

#[derive(Clone, Default)]
pub struct InMemorySessionRepository {
    sessions: Arc<RwLock<HashMap<TokenDigest, Session>>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        self.sessions
            .write()
            .insert(session.token_digest.clone(), session.clone());
        Ok(())
    }

    async fn find(&self, digest: &TokenDigest) -> Result<Option<Session>, RepositoryError> {
        Ok(self.sessions.read().get(digest).cloned())
    }

    async fn delete(&self, digest: &TokenDigest) -> Result<(), RepositoryError> {
        self.sessions.write().remove(digest);
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - sessions.len()) as u64)
    }
}
