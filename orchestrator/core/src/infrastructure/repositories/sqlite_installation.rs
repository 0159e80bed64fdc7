// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! SQLite-backed installation repository.
//!
//! Each transition is a single guarded statement (`UPDATE ... WHERE` or an
//! upsert with a conflict `WHERE`), so the guard check and the write are
//! atomic with respect to every other writer of the same database file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::BTreeMap;

use crate::domain::catalog::ServiceKey;
use crate::domain::installation::{
    AttemptId, FailureKind, InstallFailure, InstallState, ServiceInstallation, Transition,
    TransitionError,
};
use crate::domain::repository::{InstallationRepository, RepositoryError};
use crate::domain::user::UserId;
use crate::infrastructure::db::Database;

const COLUMNS: &str =
    "key, state, attempt, live_url, error_kind, last_error, installed_by, created_at, updated_at";

pub struct SqliteInstallationRepository {
    db: Database,
}

impl SqliteInstallationRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn fetch(&self, key: &ServiceKey) -> Result<Option<ServiceInstallation>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM installations WHERE key = ?"))
            .bind(key.as_str())
            .fetch_optional(self.db.get_pool())
            .await?;
        row.as_ref().map(row_to_installation).transpose()
    }

    async fn conflict(
        &self,
        key: &ServiceKey,
        transition: &Transition,
    ) -> Result<ServiceInstallation, RepositoryError> {
        let current = self
            .fetch(key)
            .await?
            .unwrap_or_else(|| ServiceInstallation::not_installed(key.clone()));
        Err(TransitionError::Conflict {
            key: key.to_string(),
            current: current.state,
            attempt: current.attempt,
            requested: transition.to,
        }
        .into())
    }
}

/// Insert-or-update used when a missing row may take part in the
/// transition. Only `Installing` has `NotInstalled` as a predecessor, so the
/// fresh row always starts at attempt 1.
fn build_upsert<'a>(
    key: &'a ServiceKey,
    transition: &'a Transition,
    allowed: &[InstallState],
    now: DateTime<Utc>,
) -> QueryBuilder<'a, Sqlite> {
    let (error_kind, last_error) = split_failure(transition.last_error.as_ref());

    let mut qb = QueryBuilder::<Sqlite>::new(format!("INSERT INTO installations ({COLUMNS}) VALUES ("));
    let mut values = qb.separated(", ");
    values.push_bind(key.as_str());
    values.push_bind(transition.to.as_str());
    values.push_bind(AttemptId::NONE.next().0 as i64);
    values.push_bind(transition.live_url.clone());
    values.push_bind(error_kind);
    values.push_bind(last_error);
    values.push_bind(transition.installed_by.map(|u| u.to_string()));
    values.push_bind(now);
    values.push_bind(now);
    values.push_unseparated(")");

    qb.push(
        " ON CONFLICT(key) DO UPDATE SET \
         state = excluded.state, \
         attempt = installations.attempt + 1, \
         live_url = excluded.live_url, \
         error_kind = excluded.error_kind, \
         last_error = excluded.last_error, \
         installed_by = excluded.installed_by, \
         updated_at = excluded.updated_at \
         WHERE installations.state IN (",
    );
    push_states(&mut qb, allowed);
    if let Some(fence) = transition.fence {
        qb.push(" AND installations.attempt = ");
        qb.push_bind(fence.0 as i64);
    }
    qb.push(format!(" RETURNING {COLUMNS}"));
    qb
}

fn build_update<'a>(
    key: &'a ServiceKey,
    transition: &'a Transition,
    allowed: &[InstallState],
    now: DateTime<Utc>,
) -> QueryBuilder<'a, Sqlite> {
    let (error_kind, last_error) = split_failure(transition.last_error.as_ref());

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE installations SET state = ");
    qb.push_bind(transition.to.as_str());
    qb.push(", live_url = ");
    qb.push_bind(transition.live_url.clone());
    qb.push(", error_kind = ");
    qb.push_bind(error_kind);
    qb.push(", last_error = ");
    qb.push_bind(last_error);
    qb.push(", updated_at = ");
    qb.push_bind(now);
    if transition.to == InstallState::Installing {
        qb.push(", attempt = attempt + 1, installed_by = ");
        qb.push_bind(transition.installed_by.map(|u| u.to_string()));
    }
    qb.push(" WHERE key = ");
    qb.push_bind(key.as_str());
    qb.push(" AND state IN (");
    push_states(&mut qb, allowed);
    if let Some(fence) = transition.fence {
        qb.push(" AND attempt = ");
        qb.push_bind(fence.0 as i64);
    }
    qb.push(format!(" RETURNING {COLUMNS}"));
    qb
}

fn push_states(qb: &mut QueryBuilder<'_, Sqlite>, states: &[InstallState]) {
    let mut list = qb.separated(", ");
    for state in states {
        list.push_bind(state.as_str());
    }
    list.push_unseparated(")");
}

fn split_failure(failure: Option<&InstallFailure>) -> (Option<&'static str>, Option<String>) {
    match failure {
        Some(f) => (Some(f.kind.as_str()), Some(f.message.clone())),
        None => (None, None),
    }
}

fn row_to_installation(row: &SqliteRow) -> Result<ServiceInstallation, RepositoryError> {
    let key: String = row.try_get("key")?;
    let state: String = row.try_get("state")?;
    let attempt: i64 = row.try_get("attempt")?;
    let error_kind: Option<String> = row.try_get("error_kind")?;
    let last_error: Option<String> = row.try_get("last_error")?;
    let installed_by: Option<String> = row.try_get("installed_by")?;

    let last_error = match (error_kind, last_error) {
        (Some(kind), message) => {
            let kind = FailureKind::parse(&kind)
                .ok_or_else(|| RepositoryError::Corrupt(format!("failure kind '{}'", kind)))?;
            Some(InstallFailure::new(kind, message.unwrap_or_default()))
        }
        (None, _) => None,
    };

    Ok(ServiceInstallation {
        key: ServiceKey::parse(&key).map_err(|e| RepositoryError::Corrupt(e.to_string()))?,
        state: InstallState::parse(&state)
            .ok_or_else(|| RepositoryError::Corrupt(format!("state '{}' for '{}'", state, key)))?,
        attempt: AttemptId(u64::try_from(attempt).map_err(|_| {
            RepositoryError::Corrupt(format!("negative attempt {} for '{}'", attempt, key))
        })?),
        live_url: row.try_get("live_url")?,
        last_error,
        installed_by: installed_by
            .map(|raw| UserId::from_string(&raw))
            .transpose()
            .map_err(|e| RepositoryError::Corrupt(e.to_string()))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl InstallationRepository for SqliteInstallationRepository {
    async fn get(&self, key: &ServiceKey) -> Result<ServiceInstallation, RepositoryError> {
        Ok(self
            .fetch(key)
            .await?
            .unwrap_or_else(|| ServiceInstallation::not_installed(key.clone())))
    }

    async fn list(&self) -> Result<BTreeMap<ServiceKey, ServiceInstallation>, RepositoryError> {
        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM installations ORDER BY key"))
            .fetch_all(self.db.get_pool())
            .await?;

        let mut installations = BTreeMap::new();
        for row in &rows {
            let installation = row_to_installation(row)?;
            installations.insert(installation.key.clone(), installation);
        }
        Ok(installations)
    }

    async fn transition(
        &self,
        key: &ServiceKey,
        transition: &Transition,
    ) -> Result<ServiceInstallation, RepositoryError> {
        let allowed = transition.allowed_sources();
        if allowed.is_empty() {
            return self.conflict(key, transition).await;
        }

        let now = Utc::now();
        let missing_row_qualifies = allowed.contains(&InstallState::NotInstalled)
            && transition.fence.map_or(true, |f| f == AttemptId::NONE);

        let mut qb = if missing_row_qualifies {
            build_upsert(key, transition, &allowed, now)
        } else {
            build_update(key, transition, &allowed, now)
        };

        let row = qb.build().fetch_optional(self.db.get_pool()).await?;
        match row {
            Some(row) => {
                let installation = row_to_installation(&row)?;
                tracing::debug!(
                    service = %key,
                    state = %installation.state,
                    attempt = %installation.attempt,
                    "Installation transition committed"
                );
                Ok(installation)
            }
            None => self.conflict(key, transition).await,
        }
    }
}
