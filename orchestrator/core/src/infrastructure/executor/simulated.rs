// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process executor that pretends to bring services up.
//!
//! Used for development without a container runtime and throughout the test
//! suite. Every start sleeps for the configured delay, then either succeeds
//! with the catalog live URL or fails when the key is listed in `fail_keys`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::domain::catalog::{ServiceDefinition, ServiceKey};
use crate::domain::config::SimulatedExecutorConfig;
use crate::domain::executor::{AttemptStatus, ExecutionError, ServiceExecutor};
use crate::domain::installation::AttemptId;

#[derive(Clone)]
pub struct SimulatedExecutor {
    delay: Duration,
    fail_keys: Vec<String>,
    public_host: String,
    attempts: Arc<Mutex<HashMap<(ServiceKey, AttemptId), AttemptStatus>>>,
}

impl SimulatedExecutor {
    pub fn new(config: SimulatedExecutorConfig, public_host: String) -> Self {
        Self {
            delay: config.delay,
            fail_keys: config.fail_keys,
            public_host,
            attempts: Arc::default(),
        }
    }

    fn record(&self, key: &ServiceKey, attempt: AttemptId, status: AttemptStatus) {
        self.attempts.lock().insert((key.clone(), attempt), status);
    }
}

#[async_trait]
impl ServiceExecutor for SimulatedExecutor {
    async fn start(
        &self,
        service: &ServiceDefinition,
        attempt: AttemptId,
        cancel: CancellationToken,
    ) -> Result<String, ExecutionError> {
        self.record(&service.key, attempt, AttemptStatus::Pending);

        tokio::select! {
            _ = cancel.cancelled() => {
                self.record(&service.key, attempt, AttemptStatus::Failed { message: "cancelled".into() });
                return Err(ExecutionError::Cancelled);
            }
            _ = tokio::time::sleep(self.delay) => {}
        }

        if self.fail_keys.iter().any(|k| k == service.key.as_str()) {
            let message = format!("simulated failure for '{}'", service.key);
            self.record(&service.key, attempt, AttemptStatus::Failed { message: message.clone() });
            return Err(ExecutionError::StartFailed(message));
        }

        let live_url = service.endpoint.live_url(&self.public_host);
        self.record(
            &service.key,
            attempt,
            AttemptStatus::Running {
                live_url: live_url.clone(),
            },
        );
        tracing::debug!(service = %service.key, attempt = %attempt, "Simulated start finished");
        Ok(live_url)
    }

    async fn status(&self, key: &ServiceKey, attempt: AttemptId) -> Result<AttemptStatus, ExecutionError> {
        Ok(self
            .attempts
            .lock()
            .get(&(key.clone(), attempt))
            .cloned()
            .unwrap_or(AttemptStatus::Unknown))
    }

    async fn cancel(&self, key: &ServiceKey, attempt: AttemptId) -> Result<bool, ExecutionError> {
        // The start future observes its token; forgetting the attempt is enough here.
        self.attempts.lock().remove(&(key.clone(), attempt));
        Ok(true)
    }

    async fn stop(&self, _service: &ServiceDefinition) -> Result<(), ExecutionError> {
        Ok(())
    }

    async fn remove(&self, service: &ServiceDefinition, attempt: AttemptId) -> Result<(), ExecutionError> {
        self.attempts
            .lock()
            .retain(|(key, recorded), _| key != &service.key || *recorded > attempt);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
