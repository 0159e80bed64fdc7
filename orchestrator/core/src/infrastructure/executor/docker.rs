// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::ContainerStateStatusEnum;
use bollard::service::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::catalog::{ServiceDefinition, ServiceKey};
use crate::domain::config::DockerExecutorConfig;
use crate::domain::executor::{AttemptStatus, ExecutionError, ServiceExecutor};
use crate::domain::installation::AttemptId;

const LABEL_SERVICE: &str = "dev.seedling.service";
const LABEL_ATTEMPT: &str = "dev.seedling.attempt";
const LABEL_LIVE_URL: &str = "dev.seedling.live-url";

/// Seconds Docker waits before killing a container on stop
const STOP_GRACE_SECS: i64 = 10;

/// Runs each service as one long-lived container named `<prefix>-<key>`.
pub struct DockerExecutor {
    docker: Docker,
    config: DockerExecutorConfig,
    public_host: String,
}

impl DockerExecutor {
    pub fn new(config: DockerExecutorConfig, public_host: String) -> Result<Self, ExecutionError> {
        let docker = match &config.socket_path {
            Some(path) => {
                #[cfg(unix)]
                let result = Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION);

                #[cfg(windows)]
                let result = Docker::connect_with_named_pipe(path, 120, bollard::API_DEFAULT_VERSION);

                result.map_err(|e| {
                    ExecutionError::Unavailable(format!(
                        "Failed to connect to Docker at {}: {}\n\n\
                         Ensure Docker is running and the socket path is correct.",
                        path, e
                    ))
                })?
            }
            None => Docker::connect_with_local_defaults().map_err(|e| {
                ExecutionError::Unavailable(format!(
                    "Failed to connect to Docker: {}\n\n\
                     Check that the daemon is running (docker ps) and that the current \
                     user can access the Docker socket.",
                    e
                ))
            })?,
        };

        Ok(Self {
            docker,
            config,
            public_host,
        })
    }

    /// Verify Docker daemon is accessible
    pub async fn healthcheck(&self) -> Result<(), ExecutionError> {
        self.docker.ping().await.map_err(|e| {
            ExecutionError::Unavailable(format!(
                "Cannot connect to Docker daemon: {}. Verify with: docker ps",
                e
            ))
        })?;
        Ok(())
    }

    fn container_name(&self, key: &ServiceKey) -> String {
        format!("{}-{}", self.config.container_prefix, key)
    }

    async fn ensure_image(&self, image: &str) -> Result<(), ExecutionError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        if !self.config.autopull {
            return Err(ExecutionError::StartFailed(format!(
                "Image {} not found locally and autopull is disabled",
                image
            )));
        }

        info!("Pulling image: {}", image);
        let options = Some(CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            if let Err(e) = result {
                return Err(ExecutionError::StartFailed(format!(
                    "Failed to pull image {}: {}. Try manually: docker pull {}",
                    image, e, image
                )));
            }
        }
        info!("Successfully pulled image: {}", image);
        Ok(())
    }

    /// Force-remove a container by name; a missing container is not an error.
    async fn force_remove(&self, name: &str) -> Result<bool, DockerError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn container_config(
        &self,
        service: &ServiceDefinition,
        image: &str,
        attempt: AttemptId,
        live_url: &str,
    ) -> Config<String> {
        let endpoint = &service.endpoint;
        let container_port = format!(
            "{}/tcp",
            endpoint.container_port.unwrap_or(endpoint.host_port)
        );

        let port_bindings = HashMap::from([(
            container_port.clone(),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(endpoint.host_port.to_string()),
            }]),
        )]);

        let labels = HashMap::from([
            (LABEL_SERVICE.to_string(), service.key.to_string()),
            (LABEL_ATTEMPT.to_string(), attempt.0.to_string()),
            (LABEL_LIVE_URL.to_string(), live_url.to_string()),
        ]);

        Config {
            image: Some(image.to_string()),
            labels: Some(labels),
            exposed_ports: Some(HashMap::from([(container_port, HashMap::new())])),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                network_mode: self.config.network_mode.clone(),
                restart_policy: Some(RestartPolicy {
                    name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                    maximum_retry_count: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn create_and_start(
        &self,
        service: &ServiceDefinition,
        attempt: AttemptId,
    ) -> Result<String, ExecutionError> {
        let image = service.image.as_deref().ok_or_else(|| {
            ExecutionError::StartFailed(format!("service '{}' has no container image", service.key))
        })?;
        self.ensure_image(image).await?;

        let name = self.container_name(&service.key);
        // A container left over from an earlier attempt holds the name and the port.
        if self
            .force_remove(&name)
            .await
            .map_err(|e| ExecutionError::StartFailed(e.to_string()))?
        {
            debug!("Removed stale container {}", name);
        }

        let live_url = service.endpoint.live_url(&self.public_host);
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };
        let res = self
            .docker
            .create_container(Some(options), self.container_config(service, image, attempt, &live_url))
            .await
            .map_err(|e| ExecutionError::StartFailed(e.to_string()))?;

        self.docker
            .start_container(&res.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ExecutionError::StartFailed(format!("Failed to start container: {}", e)))?;

        info!(service = %service.key, attempt = %attempt, "Started container {}", res.id);
        Ok(live_url)
    }
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn is_not_modified(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

#[async_trait]
impl ServiceExecutor for DockerExecutor {
    async fn start(
        &self,
        service: &ServiceDefinition,
        attempt: AttemptId,
        cancel: CancellationToken,
    ) -> Result<String, ExecutionError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ExecutionError::Cancelled),
            result = self.create_and_start(service, attempt) => result,
        }
    }

    async fn status(&self, key: &ServiceKey, attempt: AttemptId) -> Result<AttemptStatus, ExecutionError> {
        let inspect = match self.docker.inspect_container(&self.container_name(key), None).await {
            Ok(inspect) => inspect,
            Err(e) if is_not_found(&e) => return Ok(AttemptStatus::Unknown),
            Err(e) => return Err(ExecutionError::Unavailable(e.to_string())),
        };

        let labels = inspect
            .config
            .and_then(|c| c.labels)
            .unwrap_or_default();
        if labels.get(LABEL_ATTEMPT) != Some(&attempt.0.to_string()) {
            return Ok(AttemptStatus::Unknown);
        }

        let state = inspect.state.unwrap_or_default();
        Ok(match state.status {
            Some(ContainerStateStatusEnum::RUNNING) => AttemptStatus::Running {
                live_url: labels.get(LABEL_LIVE_URL).cloned().unwrap_or_default(),
            },
            Some(ContainerStateStatusEnum::CREATED) | Some(ContainerStateStatusEnum::RESTARTING) => {
                AttemptStatus::Pending
            }
            other => AttemptStatus::Failed {
                message: state
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| format!("container is {:?}", other)),
            },
        })
    }

    async fn cancel(&self, key: &ServiceKey, attempt: AttemptId) -> Result<bool, ExecutionError> {
        let name = self.container_name(key);
        match self.status(key, attempt).await? {
            AttemptStatus::Unknown => Ok(true),
            _ => {
                self.force_remove(&name)
                    .await
                    .map_err(|e| ExecutionError::RemoveFailed(e.to_string()))?;
                warn!(service = %key, attempt = %attempt, "Removed container of cancelled attempt");
                Ok(true)
            }
        }
    }

    async fn stop(&self, service: &ServiceDefinition) -> Result<(), ExecutionError> {
        let name = self.container_name(&service.key);
        let options = StopContainerOptions { t: STOP_GRACE_SECS };
        match self.docker.stop_container(&name, Some(options)).await {
            Ok(()) => {}
            Err(e) if is_not_found(&e) || is_not_modified(&e) => {
                debug!("Container {} already stopped", name);
            }
            Err(e) => return Err(ExecutionError::StopFailed(e.to_string())),
        }
        info!(service = %service.key, "Stopped container {}", name);
        Ok(())
    }

    async fn remove(&self, service: &ServiceDefinition, attempt: AttemptId) -> Result<(), ExecutionError> {
        let name = self.container_name(&service.key);
        let inspect = match self.docker.inspect_container(&name, None).await {
            Ok(inspect) => inspect,
            Err(e) if is_not_found(&e) => return Ok(()),
            Err(e) => return Err(ExecutionError::RemoveFailed(e.to_string())),
        };

        let owner = inspect
            .config
            .and_then(|c| c.labels)
            .and_then(|labels| labels.get(LABEL_ATTEMPT).and_then(|a| a.parse::<u64>().ok()));
        if let Some(owner) = owner.filter(|owner| *owner > attempt.0) {
            debug!(service = %service.key, attempt = %attempt, owner, "Container belongs to a newer attempt, keeping {}", name);
            return Ok(());
        }

        // By id, so a container recreated under the same name survives
        let id = inspect.id.unwrap_or_else(|| name.clone());
        self.force_remove(&id)
            .await
            .map_err(|e| ExecutionError::RemoveFailed(e.to_string()))?;
        info!(service = %service.key, attempt = %attempt, "Removed container {}", name);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "docker"
    }
}
