// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use seedling_core::domain::catalog::{ServiceCatalog, ServiceDefinition, ServiceKey};
use seedling_core::domain::config::{default_services, PortAllocatorConfig};
use seedling_core::domain::executor::{AttemptStatus, ExecutionError, ServiceExecutor};
use seedling_core::domain::installation::{AttemptId, InstallState, ServiceInstallation};
use seedling_core::domain::repository::InstallationRepository;

/// Executor whose behaviour is fixed up front.
pub struct ScriptedExecutor {
    pub delay: Duration,
    pub fail_with: Option<ExecutionError>,
    /// Whether `start` returns early when its token is cancelled
    pub honours_token: bool,
    /// Value returned from `cancel`
    pub can_cancel: bool,
    pub status: AttemptStatus,
    /// How long `remove` takes
    pub remove_delay: Duration,
    /// Attempt whose instance is up, zero when none is
    pub live: AtomicU64,
    pub starts: AtomicUsize,
    pub cancels: AtomicUsize,
    pub finished: AtomicUsize,
    pub removes: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn succeeding(delay: Duration) -> Self {
        Self {
            delay,
            fail_with: None,
            honours_token: true,
            can_cancel: true,
            status: AttemptStatus::Unknown,
            remove_delay: Duration::ZERO,
            live: AtomicU64::new(0),
            starts: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: ExecutionError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::succeeding(Duration::from_millis(5))
        }
    }

    /// Ignores cancellation entirely and eventually succeeds.
    pub fn stubborn(delay: Duration) -> Self {
        Self {
            honours_token: false,
            can_cancel: false,
            ..Self::succeeding(delay)
        }
    }

    pub fn with_status(mut self, status: AttemptStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_remove_delay(mut self, delay: Duration) -> Self {
        self.remove_delay = delay;
        self
    }

    pub fn live_attempt(&self) -> Option<AttemptId> {
        match self.live.load(Ordering::SeqCst) {
            0 => None,
            attempt => Some(AttemptId(attempt)),
        }
    }
}

#[async_trait]
impl ServiceExecutor for ScriptedExecutor {
    async fn start(
        &self,
        service: &ServiceDefinition,
        attempt: AttemptId,
        cancel: CancellationToken,
    ) -> Result<String, ExecutionError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.honours_token {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        } else {
            tokio::time::sleep(self.delay).await;
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(err) => Err(err.clone()),
            None => {
                self.live.store(attempt.0, Ordering::SeqCst);
                Ok(service.endpoint.live_url("localhost"))
            }
        }
    }

    async fn status(&self, _key: &ServiceKey, _attempt: AttemptId) -> Result<AttemptStatus, ExecutionError> {
        Ok(self.status.clone())
    }

    async fn cancel(&self, _key: &ServiceKey, _attempt: AttemptId) -> Result<bool, ExecutionError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(self.can_cancel)
    }

    async fn stop(&self, _service: &ServiceDefinition) -> Result<(), ExecutionError> {
        Ok(())
    }

    async fn remove(&self, _service: &ServiceDefinition, attempt: AttemptId) -> Result<(), ExecutionError> {
        tokio::time::sleep(self.remove_delay).await;
        self.removes.fetch_add(1, Ordering::SeqCst);
        let _ = self
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| (live <= attempt.0).then_some(0));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn catalog() -> Arc<ServiceCatalog> {
    let ports = PortAllocatorConfig {
        start_port: 30000,
        end_port: 30999,
    };
    Arc::new(ServiceCatalog::from_specs(&default_services(), &ports).unwrap())
}

pub fn key(raw: &str) -> ServiceKey {
    ServiceKey::parse(raw).unwrap()
}

/// Poll until the row leaves `Installing`.
pub async fn settled(repo: &dyn InstallationRepository, key: &ServiceKey) -> ServiceInstallation {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let row = repo.get(key).await.unwrap();
            if row.state != InstallState::Installing {
                return row;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("install did not settle in time")
}
