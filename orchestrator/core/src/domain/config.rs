// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Seedling Configuration Types
//
// Defines the configuration schema for a Seedling node, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - HTTP server binding and CORS origins
// - Auth settings (session TTL, registration, bootstrap admin)
// - Storage backend selection
// - Lifecycle timeout and executor adapter selection
// - The service catalog itself

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::catalog::{ServiceKey, ServiceLink};

pub const API_VERSION: &str = "seedling.dev/v1";
pub const KIND: &str = "SeedlingConfig";

/// Top-level Kubernetes-style configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedlingConfig {
    /// API version (must be "seedling.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "SeedlingConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: SeedlingConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedlingConfigSpec {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub port_allocator: PortAllocatorConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Installable services, in display order
    #[serde(default = "default_services")]
    pub services: Vec<ServiceSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Host name substituted into service live URLs
    #[serde(default = "default_public_host")]
    pub public_host: String,

    /// Browser origins allowed to call the API (the dashboard)
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_session_ttl", with = "humantime_serde")]
    pub session_ttl: Duration,

    /// Whether `POST /v1/users` accepts new accounts
    #[serde(default)]
    pub allow_registration: bool,

    /// Account created at startup when no user with this email exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<AdminSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSeed {
    pub email: String,
    #[serde(default = "default_admin_username")]
    pub username: String,
    /// Plain password (supports "env:VAR_NAME")
    pub password: String,
}

impl AdminSeed {
    /// Resolve `env:VAR_NAME` indirection for the password.
    pub fn resolve_password(&self) -> anyhow::Result<String> {
        match self.password.strip_prefix("env:") {
            Some(var) => std::env::var(var)
                .map_err(|_| anyhow::anyhow!("Environment variable {} is not set", var)),
            None => Ok(self.password.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    InMemory,
    Sqlite {
        #[serde(default = "default_database_url")]
        database_url: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Ceiling for a single install attempt
    #[serde(default = "default_install_timeout", with = "humantime_serde")]
    pub install_timeout: Duration,

    /// Reconcile rows left in `installing` by a previous process at startup
    #[serde(default = "default_true")]
    pub recover_on_startup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorConfig {
    Docker(DockerExecutorConfig),
    Simulated(SimulatedExecutorConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerExecutorConfig {
    /// Custom Docker socket path (auto-detect when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,

    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,

    #[serde(default = "default_true")]
    pub autopull: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedExecutorConfig {
    /// How long a simulated install takes
    #[serde(default = "default_simulated_delay", with = "humantime_serde")]
    pub delay: Duration,

    /// Keys whose installs always fail
    #[serde(default)]
    pub fail_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortAllocatorConfig {
    pub start_port: u16,
    pub end_port: u16,
}

impl PortAllocatorConfig {
    /// Port for the catalog entry at `position`, if the range has room.
    pub fn allocate(&self, position: usize) -> Option<u16> {
        let offset = u16::try_from(position).ok()?;
        let port = self.start_port.checked_add(offset)?;
        (port <= self.end_port).then_some(port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Catalog entry as written in the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project_url: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: Vec<ServiceLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port: Option<u16>,
    /// Fixed host port; allocated from `port_allocator` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    #[serde(default = "default_live_url_template")]
    pub live_url_template: String,
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8081
}

fn default_public_host() -> String {
    "localhost".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_session_ttl() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

fn default_admin_username() -> String {
    "admin".to_string()
}

fn default_database_url() -> String {
    "sqlite://seedling.db".to_string()
}

fn default_install_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_container_prefix() -> String {
    "seedling".to_string()
}

fn default_simulated_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

fn default_live_url_template() -> String {
    "http://{host}:{port}".to_string()
}

fn service(
    key: &str,
    name: &str,
    description: &str,
    project_url: &str,
    image: &str,
    container_port: u16,
    host_port: Option<u16>,
    tags: &[&str],
) -> ServiceSpec {
    ServiceSpec {
        key: key.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        project_url: project_url.to_string(),
        icon: format!("/icons/{}.svg", key),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        links: vec![ServiceLink {
            name: "Website".to_string(),
            url: project_url.to_string(),
        }],
        image: Some(image.to_string()),
        container_port: Some(container_port),
        host_port,
        live_url_template: default_live_url_template(),
    }
}

/// Built-in catalog used when the manifest does not list services
pub fn default_services() -> Vec<ServiceSpec> {
    vec![
        service(
            "plex",
            "Plex",
            "Stream your movies, TV and music to any device.",
            "https://www.plex.tv",
            "plexinc/pms-docker:latest",
            32400,
            Some(32400),
            &["media"],
        ),
        service(
            "jellyfin",
            "Jellyfin",
            "The free software media system.",
            "https://jellyfin.org",
            "jellyfin/jellyfin:latest",
            8096,
            Some(8096),
            &["media"],
        ),
        service(
            "nextcloud",
            "Nextcloud",
            "Files, calendars and contacts on your own server.",
            "https://nextcloud.com",
            "nextcloud:latest",
            80,
            None,
            &["files", "productivity"],
        ),
        service(
            "home-assistant",
            "Home Assistant",
            "Open source home automation that puts local control first.",
            "https://www.home-assistant.io",
            "ghcr.io/home-assistant/home-assistant:stable",
            8123,
            Some(8123),
            &["automation"],
        ),
        service(
            "gitea",
            "Gitea",
            "Painless self-hosted Git service.",
            "https://about.gitea.com",
            "gitea/gitea:latest",
            3000,
            None,
            &["development"],
        ),
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
            public_host: default_public_host(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl: default_session_ttl(),
            allow_registration: false,
            admin: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Sqlite {
            database_url: default_database_url(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            install_timeout: default_install_timeout(),
            recover_on_startup: true,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::Docker(DockerExecutorConfig::default())
    }
}

impl Default for DockerExecutorConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            network_mode: None,
            container_prefix: default_container_prefix(),
            autopull: true,
        }
    }
}

impl Default for SimulatedExecutorConfig {
    fn default() -> Self {
        Self {
            delay: default_simulated_delay(),
            fail_keys: Vec::new(),
        }
    }
}

impl Default for PortAllocatorConfig {
    fn default() -> Self {
        Self {
            start_port: 30000,
            end_port: 30999,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for SeedlingConfigSpec {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            storage: StorageConfig::default(),
            lifecycle: LifecycleConfig::default(),
            executor: ExecutorConfig::default(),
            port_allocator: PortAllocatorConfig::default(),
            observability: ObservabilityConfig::default(),
            services: default_services(),
        }
    }
}

impl Default for SeedlingConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "seedling".to_string(),
                labels: None,
            },
            spec: SeedlingConfigSpec::default(),
        }
    }
}

impl SeedlingConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. SEEDLING_CONFIG_PATH environment variable
    /// 2. ./seedling-config.yaml (working directory)
    /// 3. ~/.seedling/config.yaml (user home)
    /// 4. /etc/seedling/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SEEDLING_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./seedling-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".seedling").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/seedling/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SEEDLING_DATABASE_URL") {
            tracing::info!("Environment override: SEEDLING_DATABASE_URL");
            self.spec.storage = if url == "memory" {
                StorageConfig::InMemory
            } else {
                StorageConfig::Sqlite { database_url: url }
            };
        }

        if let Ok(val) = std::env::var("SEEDLING_INSTALL_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => {
                    tracing::info!("Environment override: SEEDLING_INSTALL_TIMEOUT_SECS={}", secs);
                    self.spec.lifecycle.install_timeout = Duration::from_secs(secs);
                }
                Err(_) => tracing::warn!(
                    "Invalid value for SEEDLING_INSTALL_TIMEOUT_SECS: '{}'. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("SEEDLING_EXECUTOR") {
            match val.to_lowercase().as_str() {
                "docker" => {
                    if !matches!(self.spec.executor, ExecutorConfig::Docker(_)) {
                        self.spec.executor = ExecutorConfig::Docker(DockerExecutorConfig::default());
                    }
                }
                "simulated" => {
                    if !matches!(self.spec.executor, ExecutorConfig::Simulated(_)) {
                        self.spec.executor =
                            ExecutorConfig::Simulated(SimulatedExecutorConfig::default());
                    }
                }
                _ => tracing::warn!(
                    "Invalid value for SEEDLING_EXECUTOR: '{}'. Expected docker/simulated. Ignoring.",
                    val
                ),
            }
        }

        if let (Ok(email), Ok(password)) = (
            std::env::var("SEEDLING_ADMIN_EMAIL"),
            std::env::var("SEEDLING_ADMIN_PASSWORD"),
        ) {
            tracing::info!("Environment override: SEEDLING_ADMIN_EMAIL={}", email);
            self.spec.auth.admin = Some(AdminSeed {
                email,
                username: default_admin_username(),
                password,
            });
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let ports = &self.spec.port_allocator;
        if ports.start_port == 0 || ports.start_port > ports.end_port {
            anyhow::bail!(
                "port_allocator range {}-{} is invalid",
                ports.start_port,
                ports.end_port
            );
        }

        if self.spec.lifecycle.install_timeout.is_zero() {
            anyhow::bail!("lifecycle.install_timeout must be greater than zero");
        }

        if self.spec.auth.session_ttl.is_zero() {
            anyhow::bail!("auth.session_ttl must be greater than zero");
        }

        if !matches!(self.spec.observability.log_format.as_str(), "text" | "json") {
            anyhow::bail!(
                "observability.log_format must be 'text' or 'json', got '{}'",
                self.spec.observability.log_format
            );
        }

        for service in &self.spec.services {
            ServiceKey::parse(&service.key)?;
            if service.name.is_empty() {
                anyhow::bail!("Service name cannot be empty for key: {}", service.key);
            }
            if matches!(self.spec.executor, ExecutorConfig::Docker(_)) && service.image.is_none() {
                anyhow::bail!(
                    "Service '{}' has no image but the docker executor is configured",
                    service.key
                );
            }
        }

        // Surfaces duplicate keys and allocator exhaustion
        crate::domain::catalog::ServiceCatalog::from_specs(&self.spec.services, ports)?;

        if let Some(admin) = &self.spec.auth.admin {
            if !admin.email.contains('@') {
                anyhow::bail!("auth.admin.email '{}' is not an email address", admin.email);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SeedlingConfig::default();
        assert_eq!(config.api_version, API_VERSION);
        assert!(config.validate().is_ok());
        assert_eq!(config.spec.lifecycle.install_timeout, Duration::from_secs(300));
        assert_eq!(config.spec.server.port, 8081);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
apiVersion: seedling.dev/v1
kind: SeedlingConfig
metadata:
  name: living-room
spec:
  storage:
    backend: in_memory
  lifecycle:
    install_timeout: 90s
  executor:
    type: simulated
    delay: 500ms
    fail_keys: [gitea]
  auth:
    session_ttl: 12h
    allow_registration: true
  services:
    - key: plex
      name: Plex
      host_port: 32400
"#;
        let config = SeedlingConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.metadata.name, "living-room");
        assert_eq!(config.spec.storage, StorageConfig::InMemory);
        assert_eq!(config.spec.lifecycle.install_timeout, Duration::from_secs(90));
        assert_eq!(config.spec.auth.session_ttl, Duration::from_secs(12 * 3600));
        assert!(config.spec.auth.allow_registration);
        match &config.spec.executor {
            ExecutorConfig::Simulated(sim) => {
                assert_eq!(sim.delay, Duration::from_millis(500));
                assert_eq!(sim.fail_keys, vec!["gitea".to_string()]);
            }
            other => panic!("unexpected executor: {:?}", other),
        }
        assert_eq!(config.spec.services.len(), 1);
        assert_eq!(config.spec.services[0].live_url_template, "http://{host}:{port}");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = SeedlingConfig::default();
        config.kind = "NodeConfig".to_string();
        assert!(config.validate().is_err());

        let mut config = SeedlingConfig::default();
        config.spec.port_allocator = PortAllocatorConfig { start_port: 200, end_port: 100 };
        assert!(config.validate().is_err());

        let mut config = SeedlingConfig::default();
        config.spec.services[0].image = None;
        assert!(config.validate().is_err());

        let mut config = SeedlingConfig::default();
        config.spec.services.push(config.spec.services[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_port_allocator_bounds() {
        let ports = PortAllocatorConfig { start_port: 30000, end_port: 30001 };
        assert_eq!(ports.allocate(0), Some(30000));
        assert_eq!(ports.allocate(1), Some(30001));
        assert_eq!(ports.allocate(2), None);
    }
}
