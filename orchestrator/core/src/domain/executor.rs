// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # External Executor Port
//!
//! The system that actually runs a service (container runtime, process
//! supervisor) is reached only through [`ServiceExecutor`]. Adapters live in
//! `crate::infrastructure::executor`.
//!
//! `start` is assumed **non-idempotent**: the lifecycle service guarantees at
//! most one in-flight `start` per key by taking the `Installing` transition
//! before dispatching.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::catalog::{ServiceDefinition, ServiceKey};
use crate::domain::installation::AttemptId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Failed to start service: {0}")]
    StartFailed(String),

    #[error("Failed to stop service: {0}")]
    StopFailed(String),

    #[error("Failed to remove service: {0}")]
    RemoveFailed(String),

    #[error("Executor unavailable: {0}")]
    Unavailable(String),

    #[error("Start cancelled")]
    Cancelled,
}

/// What the executor knows about one install attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Still being brought up
    Pending,
    Running { live_url: String },
    Failed { message: String },
    /// The executor has no record of this attempt
    Unknown,
}

#[async_trait]
pub trait ServiceExecutor: Send + Sync {
    /// Bring the service up and return the URL it is reachable at.
    ///
    /// Implementations should return [`ExecutionError::Cancelled`] promptly
    /// once `cancel` fires.
    async fn start(
        &self,
        service: &ServiceDefinition,
        attempt: AttemptId,
        cancel: CancellationToken,
    ) -> Result<String, ExecutionError>;

    async fn status(&self, key: &ServiceKey, attempt: AttemptId) -> Result<AttemptStatus, ExecutionError>;

    /// Abort an in-flight attempt. Returns `false` when the executor cannot
    /// cancel, in which case the eventual result must be discarded by the
    /// caller.
    async fn cancel(&self, key: &ServiceKey, attempt: AttemptId) -> Result<bool, ExecutionError>;

    async fn stop(&self, service: &ServiceDefinition) -> Result<(), ExecutionError>;

    /// Release the resources left by `attempt` and anything older. Resources
    /// of a newer attempt are left alone.
    async fn remove(&self, service: &ServiceDefinition, attempt: AttemptId) -> Result<(), ExecutionError>;

    /// Adapter name for logs
    fn name(&self) -> &'static str;
}
