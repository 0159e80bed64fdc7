// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Installation Lifecycle
//!
//! Drives services through the installation state graph. `install` claims the
//! key with an `Installing` compare-and-swap and hands the slow executor call
//! to a background task, so the HTTP request returns immediately and clients
//! poll for the outcome.
//!
//! Every background task reports through [`LifecycleService::complete_attempt`],
//! which is fenced on the attempt id. A result that arrives after the attempt
//! timed out, was interrupted, or was superseded is discarded.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::domain::catalog::{CatalogError, ServiceCatalog, ServiceDefinition, ServiceKey};
use crate::domain::executor::{AttemptStatus, ExecutionError, ServiceExecutor};
use crate::domain::installation::{
    AttemptId, FailureKind, InstallFailure, InstallState, ServiceInstallation, Transition,
    TransitionError,
};
use crate::domain::repository::{InstallationRepository, RepositoryError};
use crate::domain::user::UserId;

/// Result reported by an install attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded { live_url: String },
    Failed(InstallFailure),
}

/// What `complete_attempt` did with a reported outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Applied(ServiceInstallation),
    /// The attempt is no longer current; the store was not touched.
    Discarded,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Service not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Conflict(TransitionError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Install of '{key}' timed out after {}s", .after.as_secs())]
    Timeout { key: String, after: Duration },

    #[error("Install of '{0}' interrupted by shutdown")]
    Interrupted(String),

    #[error("Repository error: {0}")]
    Repository(RepositoryError),
}

impl LifecycleError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            LifecycleError::Timeout { .. } => FailureKind::Timeout,
            LifecycleError::Interrupted(_) => FailureKind::Interrupted,
            _ => FailureKind::Execution,
        }
    }
}

impl From<RepositoryError> for LifecycleError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(conflict) => LifecycleError::Conflict(conflict),
            other => LifecycleError::Repository(other),
        }
    }
}

impl From<CatalogError> for LifecycleError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(key) => LifecycleError::NotFound(key),
            // A key that does not even parse cannot be in the catalog.
            CatalogError::Invalid(msg) => LifecycleError::NotFound(msg),
        }
    }
}

#[async_trait]
pub trait LifecycleService: Send + Sync {
    /// Start an install attempt and return the `Installing` record without
    /// waiting for the executor.
    async fn install(&self, key: &str, user: Option<UserId>) -> Result<ServiceInstallation, LifecycleError>;

    /// Fenced reconciliation of an attempt's outcome.
    async fn complete_attempt(
        &self,
        key: &ServiceKey,
        attempt: AttemptId,
        outcome: AttemptOutcome,
    ) -> Result<Reconciliation, LifecycleError>;

    async fn stop(&self, key: &str) -> Result<ServiceInstallation, LifecycleError>;

    /// Stop if running, return to `NotInstalled`, then release the executor
    /// resources of the uninstalled attempt.
    async fn uninstall(&self, key: &str) -> Result<ServiceInstallation, LifecycleError>;

    /// Settle rows a previous process left in `Installing`. Returns how many
    /// rows were reconciled.
    async fn recover_interrupted(&self) -> Result<usize, LifecycleError>;

    /// Interrupt in-flight attempts and wait for their tasks to finish.
    async fn shutdown(&self);
}

#[derive(Clone)]
pub struct StandardLifecycleService {
    catalog: Arc<ServiceCatalog>,
    repository: Arc<dyn InstallationRepository>,
    executor: Arc<dyn ServiceExecutor>,
    install_timeout: Duration,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl StandardLifecycleService {
    pub fn new(
        catalog: Arc<ServiceCatalog>,
        repository: Arc<dyn InstallationRepository>,
        executor: Arc<dyn ServiceExecutor>,
        install_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            repository,
            executor,
            install_timeout,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    fn definition(&self, key: &str) -> Result<ServiceDefinition, LifecycleError> {
        Ok(self.catalog.get(key)?.clone())
    }

    /// Background half of `install`.
    async fn run_attempt(self, service: ServiceDefinition, attempt: AttemptId) {
        let key = service.key.clone();
        let cancel = self.shutdown.child_token();
        metrics::gauge!("seedling_installs_in_flight").increment(1.0);

        let mut handle: JoinHandle<Result<String, ExecutionError>> = {
            let executor = self.executor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { executor.start(&service, attempt, cancel).await })
        };

        let result = tokio::select! {
            biased;
            joined = &mut handle => flatten(joined),
            _ = tokio::time::sleep(self.install_timeout) => Err(LifecycleError::Timeout {
                key: key.to_string(),
                after: self.install_timeout,
            }),
            _ = self.shutdown.cancelled() => Err(LifecycleError::Interrupted(key.to_string())),
        };
        // The executor may notice shutdown before this task does.
        let result = match result {
            Err(LifecycleError::Execution(ExecutionError::Cancelled)) if self.shutdown.is_cancelled() => {
                Err(LifecycleError::Interrupted(key.to_string()))
            }
            other => other,
        };

        match result {
            Ok(live_url) => {
                self.report(&key, attempt, AttemptOutcome::Succeeded { live_url }).await;
            }
            Err(err) => {
                let kind = err.failure_kind();
                let failure = InstallFailure::new(kind, err.to_string());
                self.report(&key, attempt, AttemptOutcome::Failed(failure)).await;

                if kind != FailureKind::Execution {
                    cancel.cancel();
                    self.abandon(&key, attempt, handle, kind == FailureKind::Timeout).await;
                }
            }
        }

        metrics::gauge!("seedling_installs_in_flight").decrement(1.0);
    }

    /// Ask the executor to cancel an attempt that was already failed. When it
    /// cannot, optionally wait for the late result and feed it through the
    /// fence so it is accounted for and discarded.
    async fn abandon(
        &self,
        key: &ServiceKey,
        attempt: AttemptId,
        handle: JoinHandle<Result<String, ExecutionError>>,
        await_late_result: bool,
    ) {
        let cancelled = match self.executor.cancel(key, attempt).await {
            Ok(cancelled) => cancelled,
            Err(e) => {
                warn!(service = %key, attempt = %attempt, "Executor cancel failed: {}", e);
                false
            }
        };
        if cancelled || !await_late_result {
            return;
        }

        debug!(service = %key, attempt = %attempt, "Executor could not cancel, awaiting late result");
        let joined = tokio::select! {
            joined = handle => joined,
            _ = self.shutdown.cancelled() => {
                debug!(service = %key, attempt = %attempt, "Shutdown while awaiting late result");
                return;
            }
        };
        let outcome = match flatten(joined) {
            Ok(live_url) => AttemptOutcome::Succeeded { live_url },
            Err(err) => AttemptOutcome::Failed(InstallFailure::new(err.failure_kind(), err.to_string())),
        };
        self.report(key, attempt, outcome).await;
    }

    /// `complete_attempt` for background tasks, which have nobody to return
    /// an error to.
    async fn report(&self, key: &ServiceKey, attempt: AttemptId, outcome: AttemptOutcome) {
        if let Err(e) = self.complete_attempt(key, attempt, outcome).await {
            error!(service = %key, attempt = %attempt, "Failed to record install outcome: {}", e);
        }
    }
}

fn flatten(
    joined: Result<Result<String, ExecutionError>, tokio::task::JoinError>,
) -> Result<String, LifecycleError> {
    match joined {
        Ok(Ok(live_url)) => Ok(live_url),
        Ok(Err(e)) => Err(LifecycleError::Execution(e)),
        Err(join) => Err(LifecycleError::Execution(ExecutionError::StartFailed(format!(
            "executor task aborted: {}",
            join
        )))),
    }
}

#[async_trait]
impl LifecycleService for StandardLifecycleService {
    async fn install(&self, key: &str, user: Option<UserId>) -> Result<ServiceInstallation, LifecycleError> {
        let service = self.definition(key)?;

        let mut transition = Transition::to(InstallState::Installing).from(&[
            InstallState::NotInstalled,
            InstallState::Failed,
            InstallState::Stopped,
        ]);
        if let Some(user) = user {
            transition = transition.by(user);
        }

        let row = match self.repository.transition(&service.key, &transition).await {
            Ok(row) => row,
            Err(e) => {
                if matches!(e, RepositoryError::Conflict(_)) {
                    metrics::counter!("seedling_install_conflicts_total").increment(1);
                }
                return Err(e.into());
            }
        };

        info!(
            service = %service.key,
            attempt = %row.attempt,
            executor = self.executor.name(),
            "Install started"
        );
        metrics::counter!("seedling_installs_started_total", "service" => service.key.to_string())
            .increment(1);

        let attempt = row.attempt;
        self.tasks.spawn(self.clone().run_attempt(service, attempt));
        Ok(row)
    }

    async fn complete_attempt(
        &self,
        key: &ServiceKey,
        attempt: AttemptId,
        outcome: AttemptOutcome,
    ) -> Result<Reconciliation, LifecycleError> {
        let transition = match &outcome {
            AttemptOutcome::Succeeded { live_url } => Transition::to(InstallState::Running)
                .with_live_url(live_url.clone()),
            AttemptOutcome::Failed(failure) => {
                Transition::to(InstallState::Failed).with_error(failure.clone())
            }
        }
        .from(&[InstallState::Installing])
        .fenced(attempt);

        match self.repository.transition(key, &transition).await {
            Ok(row) => {
                match &outcome {
                    AttemptOutcome::Succeeded { live_url } => {
                        info!(service = %key, attempt = %attempt, live_url = %live_url, "Install succeeded");
                        metrics::counter!("seedling_installs_succeeded_total", "service" => key.to_string())
                            .increment(1);
                    }
                    AttemptOutcome::Failed(failure) => {
                        warn!(
                            service = %key,
                            attempt = %attempt,
                            kind = failure.kind.as_str(),
                            "Install failed: {}",
                            failure.message
                        );
                        metrics::counter!(
                            "seedling_installs_failed_total",
                            "service" => key.to_string(),
                            "kind" => failure.kind.as_str()
                        )
                        .increment(1);
                    }
                }
                Ok(Reconciliation::Applied(row))
            }
            Err(RepositoryError::Conflict(conflict)) => {
                debug!(service = %key, attempt = %attempt, "Discarding stale result: {}", conflict);
                metrics::counter!("seedling_stale_results_discarded_total").increment(1);
                Ok(Reconciliation::Discarded)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn stop(&self, key: &str) -> Result<ServiceInstallation, LifecycleError> {
        let service = self.definition(key)?;
        let current = self.repository.get(&service.key).await?;
        if current.state != InstallState::Running {
            return Err(LifecycleError::Conflict(TransitionError::Conflict {
                key: service.key.to_string(),
                current: current.state,
                attempt: current.attempt,
                requested: InstallState::Stopped,
            }));
        }

        self.executor.stop(&service).await?;
        let row = self
            .repository
            .transition(
                &service.key,
                &Transition::to(InstallState::Stopped).from(&[InstallState::Running]),
            )
            .await?;
        info!(service = %service.key, "Service stopped");
        Ok(row)
    }

    async fn uninstall(&self, key: &str) -> Result<ServiceInstallation, LifecycleError> {
        let service = self.definition(key)?;
        if self.repository.get(&service.key).await?.state == InstallState::Running {
            self.stop(key).await?;
        }

        // Released in the store before the executor is touched
        let row = self
            .repository
            .transition(
                &service.key,
                &Transition::to(InstallState::NotInstalled)
                    .from(&[InstallState::Stopped, InstallState::Failed]),
            )
            .await?;

        // A leaked container is replaced by the next start of this service.
        if let Err(e) = self.executor.remove(&service, row.attempt).await {
            warn!(service = %service.key, attempt = %row.attempt, "Failed to release service resources: {}", e);
        }
        info!(service = %service.key, attempt = %row.attempt, "Service uninstalled");
        metrics::counter!("seedling_uninstalls_total", "service" => service.key.to_string()).increment(1);
        Ok(row)
    }

    async fn recover_interrupted(&self) -> Result<usize, LifecycleError> {
        let orphaned: Vec<ServiceInstallation> = self
            .repository
            .list()
            .await?
            .into_values()
            .filter(|row| row.state == InstallState::Installing)
            .collect();

        let mut reconciled = 0;
        for row in orphaned {
            let outcome = match self.executor.status(&row.key, row.attempt).await {
                Ok(AttemptStatus::Running { live_url }) => AttemptOutcome::Succeeded { live_url },
                Ok(status) => {
                    if status == AttemptStatus::Pending {
                        if let Err(e) = self.executor.cancel(&row.key, row.attempt).await {
                            warn!(service = %row.key, "Could not cancel orphaned attempt: {}", e);
                        }
                    }
                    AttemptOutcome::Failed(InstallFailure::new(
                        FailureKind::Interrupted,
                        format!("install interrupted by restart ({:?})", status),
                    ))
                }
                Err(e) => AttemptOutcome::Failed(InstallFailure::new(
                    FailureKind::Interrupted,
                    format!("install interrupted by restart: {}", e),
                )),
            };

            if let Reconciliation::Applied(settled) =
                self.complete_attempt(&row.key, row.attempt, outcome).await?
            {
                info!(service = %row.key, attempt = %row.attempt, state = %settled.state, "Recovered interrupted install");
                reconciled += 1;
            }
        }
        Ok(reconciled)
    }

    async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!("Lifecycle service stopped");
    }
}
