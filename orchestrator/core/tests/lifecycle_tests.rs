// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use async_trait::async_trait;
use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use seedling_core::application::lifecycle::{
    AttemptOutcome, LifecycleError, LifecycleService, Reconciliation, StandardLifecycleService,
};
use seedling_core::domain::executor::{AttemptStatus, ExecutionError};
use seedling_core::domain::catalog::ServiceKey;
use seedling_core::domain::installation::{
    AttemptId, FailureKind, InstallFailure, InstallState, ServiceInstallation, Transition,
};
use seedling_core::domain::repository::{InstallationRepository, RepositoryError};
use seedling_core::domain::user::UserId;
use seedling_core::infrastructure::repositories::InMemoryInstallationRepository;

use common::{catalog, key, settled, ScriptedExecutor};

struct Harness {
    repo: Arc<InMemoryInstallationRepository>,
    executor: Arc<ScriptedExecutor>,
    lifecycle: StandardLifecycleService,
}

fn harness(executor: ScriptedExecutor, timeout: Duration) -> Harness {
    let repo = Arc::new(InMemoryInstallationRepository::new());
    let executor = Arc::new(executor);
    let lifecycle = StandardLifecycleService::new(catalog(), repo.clone(), executor.clone(), timeout);
    Harness {
        repo,
        executor,
        lifecycle,
    }
}

#[tokio::test]
async fn test_plex_install_reaches_running() {
    let h = harness(ScriptedExecutor::succeeding(Duration::from_millis(20)), Duration::from_secs(5));
    let user = UserId::new();

    let row = h.lifecycle.install("plex", Some(user)).await.unwrap();
    assert_eq!(row.state, InstallState::Installing);
    assert_eq!(row.attempt, AttemptId(1));
    assert_eq!(row.installed_by, Some(user));

    let row = settled(h.repo.as_ref(), &key("plex")).await;
    assert_eq!(row.state, InstallState::Running);
    assert_eq!(row.live_url.as_deref(), Some("http://localhost:32400"));
    assert!(row.last_error.is_none());
    assert_eq!(h.executor.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_double_install_conflicts() {
    let h = harness(ScriptedExecutor::succeeding(Duration::from_millis(200)), Duration::from_secs(5));

    h.lifecycle.install("plex", None).await.unwrap();
    match h.lifecycle.install("plex", None).await {
        Err(LifecycleError::Conflict(_)) => {}
        other => panic!("expected conflict, got {:?}", other),
    }

    settled(h.repo.as_ref(), &key("plex")).await;
    // Installing a running service is also a conflict
    assert!(matches!(
        h.lifecycle.install("plex", None).await,
        Err(LifecycleError::Conflict(_))
    ));
    assert_eq!(h.executor.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_installs_start_executor_once() {
    let h = Arc::new(harness(
        ScriptedExecutor::succeeding(Duration::from_millis(100)),
        Duration::from_secs(5),
    ));

    let mut handles = Vec::new();
    for _ in 0..12 {
        let h = h.clone();
        handles.push(tokio::spawn(async move { h.lifecycle.install("jellyfin", None).await }));
    }
    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);

    let row = settled(h.repo.as_ref(), &key("jellyfin")).await;
    assert_eq!(row.state, InstallState::Running);
    assert_eq!(h.executor.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_service_is_not_found() {
    let h = harness(ScriptedExecutor::succeeding(Duration::ZERO), Duration::from_secs(5));
    assert!(matches!(
        h.lifecycle.install("minecraft", None).await,
        Err(LifecycleError::NotFound(_))
    ));
    assert!(matches!(
        h.lifecycle.install("Not A Key", None).await,
        Err(LifecycleError::NotFound(_))
    ));
    assert!(h.repo.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_executor_failure_records_failed_and_allows_retry() {
    let h = harness(
        ScriptedExecutor::failing(ExecutionError::StartFailed("port in use".into())),
        Duration::from_secs(5),
    );

    h.lifecycle.install("gitea", None).await.unwrap();
    let row = settled(h.repo.as_ref(), &key("gitea")).await;
    assert_eq!(row.state, InstallState::Failed);
    let failure = row.last_error.unwrap();
    assert_eq!(failure.kind, FailureKind::Execution);
    assert!(failure.message.contains("port in use"));

    // No automatic retry, but the client may re-issue install
    assert_eq!(h.executor.starts.load(Ordering::SeqCst), 1);
    let retry = h.lifecycle.install("gitea", None).await.unwrap();
    assert_eq!(retry.attempt, AttemptId(2));
    assert!(retry.last_error.is_none());
}

#[tokio::test]
async fn test_timeout_wins_over_late_success() {
    let h = harness(
        ScriptedExecutor::stubborn(Duration::from_millis(300)),
        Duration::from_millis(50),
    );

    h.lifecycle.install("plex", None).await.unwrap();
    let row = settled(h.repo.as_ref(), &key("plex")).await;
    assert_eq!(row.state, InstallState::Failed);
    assert_eq!(row.last_error.as_ref().map(|e| e.kind), Some(FailureKind::Timeout));

    // Let the executor finish; its result must be discarded.
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.executor.finished.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let row = h.repo.get(&key("plex")).await.unwrap();
    assert_eq!(row.state, InstallState::Failed);
    assert_eq!(row.attempt, AttemptId(1));
    assert!(row.live_url.is_none());
    assert_eq!(h.executor.cancels.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_timeout_cancels_cooperative_executor() {
    let h = harness(
        ScriptedExecutor::succeeding(Duration::from_secs(30)),
        Duration::from_millis(30),
    );

    h.lifecycle.install("home-assistant", None).await.unwrap();
    let row = settled(h.repo.as_ref(), &key("home-assistant")).await;
    assert_eq!(row.last_error.map(|e| e.kind), Some(FailureKind::Timeout));
    assert_eq!(h.executor.finished.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stale_completion_is_discarded() {
    let h = harness(ScriptedExecutor::succeeding(Duration::from_millis(10)), Duration::from_secs(5));
    let k = key("plex");

    h.lifecycle.install("plex", None).await.unwrap();
    settled(h.repo.as_ref(), &k).await;

    let outcome = h
        .lifecycle
        .complete_attempt(
            &k,
            AttemptId(1),
            AttemptOutcome::Failed(InstallFailure::new(FailureKind::Execution, "late")),
        )
        .await
        .unwrap();
    assert_eq!(outcome, Reconciliation::Discarded);
    assert_eq!(h.repo.get(&k).await.unwrap().state, InstallState::Running);

    let outcome = h
        .lifecycle
        .complete_attempt(
            &k,
            AttemptId(7),
            AttemptOutcome::Succeeded {
                live_url: "http://elsewhere".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome, Reconciliation::Discarded);
    assert_eq!(
        h.repo.get(&k).await.unwrap().live_url.as_deref(),
        Some("http://localhost:32400")
    );
}

#[tokio::test]
async fn test_stop_and_uninstall_then_reinstall() {
    let h = harness(ScriptedExecutor::succeeding(Duration::from_millis(10)), Duration::from_secs(5));
    let k = key("jellyfin");

    // Nothing to stop yet
    assert!(matches!(
        h.lifecycle.stop("jellyfin").await,
        Err(LifecycleError::Conflict(_))
    ));

    h.lifecycle.install("jellyfin", None).await.unwrap();
    settled(h.repo.as_ref(), &k).await;

    let row = h.lifecycle.stop("jellyfin").await.unwrap();
    assert_eq!(row.state, InstallState::Stopped);

    let row = h.lifecycle.uninstall("jellyfin").await.unwrap();
    assert_eq!(row.state, InstallState::NotInstalled);
    assert_eq!(h.executor.removes.load(Ordering::SeqCst), 1);

    let row = h.lifecycle.install("jellyfin", None).await.unwrap();
    assert_eq!(row.attempt, AttemptId(2));
    let row = settled(h.repo.as_ref(), &k).await;
    assert_eq!(row.state, InstallState::Running);

    // Uninstalling a running service stops it first
    let row = h.lifecycle.uninstall("jellyfin").await.unwrap();
    assert_eq!(row.state, InstallState::NotInstalled);
}

#[tokio::test]
async fn test_uninstall_rejects_in_flight_install() {
    let h = harness(ScriptedExecutor::succeeding(Duration::from_millis(200)), Duration::from_secs(5));
    h.lifecycle.install("nextcloud", None).await.unwrap();
    assert!(matches!(
        h.lifecycle.uninstall("nextcloud").await,
        Err(LifecycleError::Conflict(_))
    ));
    assert_eq!(h.executor.removes.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_uninstall_racing_install_keeps_new_instance() {
    let h = Arc::new(harness(
        ScriptedExecutor::succeeding(Duration::from_millis(10)).with_remove_delay(Duration::from_millis(100)),
        Duration::from_secs(5),
    ));
    let k = key("plex");
    h.repo.transition(&k, &Transition::to(InstallState::Installing)).await.unwrap();
    h.repo.transition(&k, &Transition::to(InstallState::Failed)).await.unwrap();
    // Leftovers of the failed first attempt
    h.executor.live.store(1, Ordering::SeqCst);

    let uninstall = {
        let h = h.clone();
        tokio::spawn(async move { h.lifecycle.uninstall("plex").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let row = h.lifecycle.install("plex", None).await.unwrap();
    assert_eq!(row.attempt, AttemptId(2));
    let row = settled(h.repo.as_ref(), &k).await;
    assert_eq!(row.state, InstallState::Running);

    let removed = uninstall.await.unwrap().unwrap();
    assert_eq!(removed.state, InstallState::NotInstalled);
    assert_eq!(removed.attempt, AttemptId(1));
    assert_eq!(h.executor.removes.load(Ordering::SeqCst), 1);

    // Store and executor agree on the instance that is up
    let row = h.repo.get(&k).await.unwrap();
    assert_eq!(row.state, InstallState::Running);
    assert_eq!(row.live_url.as_deref(), Some("http://localhost:32400"));
    assert_eq!(h.executor.live_attempt(), Some(AttemptId(2)));
}

#[tokio::test]
async fn test_uninstall_losing_to_install_leaves_executor_alone() {
    let h = harness(ScriptedExecutor::succeeding(Duration::from_millis(10)), Duration::from_secs(5));
    let k = key("gitea");
    h.repo.transition(&k, &Transition::to(InstallState::Installing)).await.unwrap();
    h.repo.transition(&k, &Transition::to(InstallState::Failed)).await.unwrap();
    // The key is claimed again before uninstall gets to it
    h.lifecycle.install("gitea", None).await.unwrap();

    assert!(matches!(
        h.lifecycle.uninstall("gitea").await,
        Err(LifecycleError::Conflict(_))
    ));
    settled(h.repo.as_ref(), &k).await;
    assert_eq!(h.executor.removes.load(Ordering::SeqCst), 0);
    assert_eq!(h.executor.live_attempt(), Some(AttemptId(2)));
}

/// Store whose backend is down.
struct UnavailableStore;

#[async_trait]
impl InstallationRepository for UnavailableStore {
    async fn get(&self, _key: &ServiceKey) -> Result<ServiceInstallation, RepositoryError> {
        Err(RepositoryError::Database("database is locked".into()))
    }

    async fn list(&self) -> Result<BTreeMap<ServiceKey, ServiceInstallation>, RepositoryError> {
        Err(RepositoryError::Database("database is locked".into()))
    }

    async fn transition(
        &self,
        _key: &ServiceKey,
        _transition: &Transition,
    ) -> Result<ServiceInstallation, RepositoryError> {
        Err(RepositoryError::Database("database is locked".into()))
    }
}

/// Counts `seedling_install_conflicts_total`, ignores everything else.
#[derive(Default)]
struct ConflictRecorder {
    conflicts: Arc<AtomicU64>,
}

impl Recorder for ConflictRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        if key.name() == "seedling_install_conflicts_total" {
            Counter::from_arc(self.conflicts.clone())
        } else {
            Counter::noop()
        }
    }

    fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

#[test]
fn test_only_lost_races_count_as_install_conflicts() {
    let recorder = ConflictRecorder::default();
    let conflicts = recorder.conflicts.clone();

    metrics::with_local_recorder(&recorder, || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let broken = StandardLifecycleService::new(
                catalog(),
                Arc::new(UnavailableStore),
                Arc::new(ScriptedExecutor::succeeding(Duration::ZERO)),
                Duration::from_secs(5),
            );
            assert!(matches!(
                broken.install("plex", None).await,
                Err(LifecycleError::Repository(_))
            ));
            assert_eq!(conflicts.load(Ordering::SeqCst), 0);

            let h = harness(ScriptedExecutor::succeeding(Duration::from_millis(200)), Duration::from_secs(5));
            h.lifecycle.install("plex", None).await.unwrap();
            assert!(matches!(
                h.lifecycle.install("plex", None).await,
                Err(LifecycleError::Conflict(_))
            ));
            assert_eq!(conflicts.load(Ordering::SeqCst), 1);
            h.lifecycle.shutdown().await;
        });
    });
}

#[tokio::test]
async fn test_recovery_settles_orphaned_installs() {
    let h = harness(
        ScriptedExecutor::succeeding(Duration::ZERO).with_status(AttemptStatus::Unknown),
        Duration::from_secs(5),
    );
    // Rows left behind by a previous process
    h.repo.transition(&key("plex"), &Transition::to(InstallState::Installing)).await.unwrap();
    h.repo.transition(&key("gitea"), &Transition::to(InstallState::Installing)).await.unwrap();
    h.repo.transition(&key("gitea"), &Transition::to(InstallState::Failed)).await.unwrap();

    assert_eq!(h.lifecycle.recover_interrupted().await.unwrap(), 1);
    let row = h.repo.get(&key("plex")).await.unwrap();
    assert_eq!(row.state, InstallState::Failed);
    assert_eq!(row.last_error.map(|e| e.kind), Some(FailureKind::Interrupted));
    assert_eq!(h.repo.get(&key("gitea")).await.unwrap().state, InstallState::Failed);
}

#[tokio::test]
async fn test_recovery_adopts_running_instance() {
    let h = harness(
        ScriptedExecutor::succeeding(Duration::ZERO).with_status(AttemptStatus::Running {
            live_url: "http://localhost:32400".into(),
        }),
        Duration::from_secs(5),
    );
    h.repo.transition(&key("plex"), &Transition::to(InstallState::Installing)).await.unwrap();

    assert_eq!(h.lifecycle.recover_interrupted().await.unwrap(), 1);
    let row = h.repo.get(&key("plex")).await.unwrap();
    assert_eq!(row.state, InstallState::Running);
    assert_eq!(row.live_url.as_deref(), Some("http://localhost:32400"));
}

#[tokio::test]
async fn test_shutdown_interrupts_in_flight_attempts() {
    let h = harness(ScriptedExecutor::succeeding(Duration::from_secs(30)), Duration::from_secs(60));
    h.lifecycle.install("plex", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(5), h.lifecycle.shutdown())
        .await
        .expect("shutdown hung");

    let row = h.repo.get(&key("plex")).await.unwrap();
    assert_eq!(row.state, InstallState::Failed);
    assert_eq!(row.last_error.map(|e| e.kind), Some(FailureKind::Interrupted));
}
