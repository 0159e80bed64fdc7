// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations from the `spec.storage`
//! section of the configuration manifest, keeping the domain layer free of
//! infrastructure choices.

use std::sync::Arc;

use crate::domain::config::StorageConfig;
use crate::domain::repository::{
    InstallationRepository, RepositoryError, SessionRepository, UserRepository,
};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::{
    InMemoryInstallationRepository, InMemorySessionRepository, InMemoryUserRepository,
    SqliteInstallationRepository, SqliteSessionRepository, SqliteUserRepository,
};

/// Every repository the server needs, backed by one storage backend.
#[derive(Clone)]
pub struct Repositories {
    pub installations: Arc<dyn InstallationRepository>,
    pub users: Arc<dyn UserRepository>,
    pub sessions: Arc<dyn SessionRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            installations: Arc::new(InMemoryInstallationRepository::new()),
            users: Arc::new(InMemoryUserRepository::new()),
            sessions: Arc::new(InMemorySessionRepository::new()),
        }
    }

    pub fn sqlite(db: Database) -> Self {
        Self {
            installations: Arc::new(SqliteInstallationRepository::new(db.clone())),
            users: Arc::new(SqliteUserRepository::new(db.clone())),
            sessions: Arc::new(SqliteSessionRepository::new(db)),
        }
    }
}

/// Creates the repositories for the configured backend, opening and
/// migrating the database when one is used.
pub async fn create_repositories(storage: &StorageConfig) -> Result<Repositories, RepositoryError> {
    match storage {
        StorageConfig::InMemory => {
            tracing::warn!("Using in-memory storage; state is lost on restart");
            Ok(Repositories::in_memory())
        }
        StorageConfig::Sqlite { database_url } => {
            let db = Database::connect(database_url).await?;
            Ok(Repositories::sqlite(db))
        }
    }
}
