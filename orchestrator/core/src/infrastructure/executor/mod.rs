// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Service executor adapters.
//!
//! - [`DockerExecutor`] runs each catalog entry as a container through the
//!   Docker Engine API.
//! - [`SimulatedExecutor`] fakes installs in-process for development and tests.

pub mod docker;
pub mod simulated;

pub use docker::DockerExecutor;
pub use simulated::SimulatedExecutor;

use std::sync::Arc;

use crate::domain::config::ExecutorConfig;
use crate::domain::executor::{ExecutionError, ServiceExecutor};

/// Build the executor selected by `spec.executor`. A Docker executor must
/// reach its daemon before it is handed out.
pub async fn build_executor(
    config: &ExecutorConfig,
    public_host: &str,
) -> Result<Arc<dyn ServiceExecutor>, ExecutionError> {
    Ok(match config {
        ExecutorConfig::Docker(docker) => {
            let executor = DockerExecutor::new(docker.clone(), public_host.to_string())?;
            executor.healthcheck().await?;
            Arc::new(executor)
        }
        ExecutorConfig::Simulated(simulated) => {
            Arc::new(SimulatedExecutor::new(simulated.clone(), public_host.to_string()))
        }
    })
}
