// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Read side: joins catalog definitions with installation state into the
//! shapes the dashboard renders.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::application::lifecycle::LifecycleError;
use crate::domain::catalog::{ServiceCatalog, ServiceDefinition, ServiceLink};
use crate::domain::installation::{
    AttemptId, InstallFailure, InstallState, ServiceInstallation,
};
use crate::domain::repository::InstallationRepository;

/// Catalog entry plus its current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceView {
    pub key: String,
    pub name: String,
    pub description: String,
    pub project_url: String,
    pub icon: String,
    /// Installing, running or stopped
    pub is_installed: bool,
    /// An install may be started now
    pub is_available: bool,
    pub is_running: bool,
    pub status: InstallState,
}

impl ServiceView {
    pub fn new(definition: &ServiceDefinition, state: InstallState) -> Self {
        Self {
            key: definition.key.to_string(),
            name: definition.name.clone(),
            description: definition.description.clone(),
            project_url: definition.project_url.clone(),
            icon: definition.icon.clone(),
            is_installed: matches!(
                state,
                InstallState::Installing | InstallState::Running | InstallState::Stopped
            ),
            is_available: state.accepts_install(),
            is_running: state == InstallState::Running,
            status: state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDetail {
    #[serde(flatten)]
    pub service: ServiceView,
    pub tags: Vec<String>,
    pub links: Vec<ServiceLink>,
    pub live_url: Option<String>,
    pub attempt: AttemptId,
    pub last_error: Option<InstallFailure>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledServiceView {
    pub name: String,
    pub description: String,
    pub live_url: Option<String>,
    pub service: ServiceView,
}

impl InstalledServiceView {
    pub fn new(definition: &ServiceDefinition, installation: &ServiceInstallation) -> Self {
        Self {
            name: definition.name.clone(),
            description: definition.description.clone(),
            live_url: installation.live_url.clone(),
            service: ServiceView::new(definition, installation.state),
        }
    }
}

pub struct ServiceDirectory {
    catalog: Arc<ServiceCatalog>,
    repository: Arc<dyn InstallationRepository>,
}

impl ServiceDirectory {
    pub fn new(catalog: Arc<ServiceCatalog>, repository: Arc<dyn InstallationRepository>) -> Self {
        Self { catalog, repository }
    }

    /// Every catalog entry in catalog order.
    pub async fn list_services(&self) -> Result<Vec<ServiceView>, LifecycleError> {
        let rows = self.repository.list().await?;
        Ok(self
            .catalog
            .list()
            .iter()
            .map(|definition| {
                let state = rows
                    .get(&definition.key)
                    .map_or(InstallState::NotInstalled, |row| row.state);
                ServiceView::new(definition, state)
            })
            .collect())
    }

    pub async fn service(&self, key: &str) -> Result<ServiceDetail, LifecycleError> {
        let definition = self.catalog.get(key)?;
        let row = self.repository.get(&definition.key).await?;
        let recorded = row.attempt != AttemptId::NONE;
        Ok(ServiceDetail {
            service: ServiceView::new(definition, row.state),
            tags: definition.tags.clone(),
            links: definition.links.clone(),
            live_url: row.live_url,
            attempt: row.attempt,
            last_error: row.last_error,
            updated_at: recorded.then_some(row.updated_at),
        })
    }

    /// Recorded installations that are not back at `NotInstalled`, in
    /// catalog order. Rows for keys no longer in the catalog are skipped.
    pub async fn installed(&self) -> Result<Vec<InstalledServiceView>, LifecycleError> {
        let rows = self.repository.list().await?;
        Ok(self
            .catalog
            .list()
            .iter()
            .filter_map(|definition| {
                rows.get(&definition.key)
                    .filter(|row| row.state != InstallState::NotInstalled)
                    .map(|row| InstalledServiceView::new(definition, row))
            })
            .collect())
    }

    pub async fn installed_service(&self, key: &str) -> Result<InstalledServiceView, LifecycleError> {
        let definition = self.catalog.get(key)?;
        let row = self.repository.get(&definition.key).await?;
        if row.state == InstallState::NotInstalled {
            return Err(LifecycleError::NotFound(format!("{} is not installed", key)));
        }
        Ok(InstalledServiceView::new(definition, &row))
    }

    /// View of a record returned by a lifecycle operation.
    pub fn view(&self, installation: &ServiceInstallation) -> Result<InstalledServiceView, LifecycleError> {
        let definition = self.catalog.get(installation.key.as_str())?;
        Ok(InstalledServiceView::new(definition, installation))
    }
}
