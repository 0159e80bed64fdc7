// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Service Catalog
//!
//! Registry of every installable service. Built once at startup from the
//! `services` section of the configuration manifest and never mutated by
//! requests afterwards.
//!
//! Entries without an explicit `host_port` receive one from the port
//! allocator: `start_port + catalog_index`, which keeps the assignment stable
//! across restarts as long as the catalog order is unchanged.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::config::{PortAllocatorConfig, ServiceSpec};

/// Stable identifier of a catalog entry (e.g. `plex`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceKey(String);

impl ServiceKey {
    /// Parse a key, accepting only lowercase ASCII letters, digits and `-`.
    pub fn parse(raw: &str) -> Result<Self, CatalogError> {
        let valid = !raw.is_empty()
            && raw.len() <= 63
            && !raw.starts_with('-')
            && raw.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
        if !valid {
            return Err(CatalogError::Invalid(format!(
                "service key '{}' must match [a-z0-9-] and be at most 63 characters",
                raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ServiceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLink {
    pub name: String,
    pub url: String,
}

/// Where an installed service can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Port the service listens on inside its container, if containerised.
    pub container_port: Option<u16>,
    /// Port published on the host.
    pub host_port: u16,
    /// Template with `{host}` and `{port}` placeholders.
    pub live_url_template: String,
}

impl Endpoint {
    pub fn live_url(&self, host: &str) -> String {
        self.live_url_template
            .replace("{host}", host)
            .replace("{port}", &self.host_port.to_string())
    }
}

/// Immutable description of an installable service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub key: ServiceKey,
    pub name: String,
    pub description: String,
    pub project_url: String,
    pub icon: String,
    pub tags: Vec<String>,
    pub links: Vec<ServiceLink>,
    /// Container image reference used by container-based executors.
    pub image: Option<String>,
    pub endpoint: Endpoint,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Service not found: {0}")]
    NotFound(String),

    #[error("Invalid catalog: {0}")]
    Invalid(String),
}

/// Read-only, insertion-ordered registry of service definitions.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    services: Vec<ServiceDefinition>,
    index: HashMap<ServiceKey, usize>,
}

impl ServiceCatalog {
    pub fn new(services: Vec<ServiceDefinition>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(services.len());
        for (position, service) in services.iter().enumerate() {
            if service.name.trim().is_empty() {
                return Err(CatalogError::Invalid(format!(
                    "service '{}' has an empty name",
                    service.key
                )));
            }
            if index.insert(service.key.clone(), position).is_some() {
                return Err(CatalogError::Invalid(format!(
                    "duplicate service key '{}'",
                    service.key
                )));
            }
        }
        Ok(Self { services, index })
    }

    /// Build the catalog from configuration, allocating host ports for
    /// entries that do not pin one.
    pub fn from_specs(
        specs: &[ServiceSpec],
        ports: &PortAllocatorConfig,
    ) -> Result<Self, CatalogError> {
        let mut services = Vec::with_capacity(specs.len());
        for (position, spec) in specs.iter().enumerate() {
            let key = ServiceKey::parse(&spec.key)?;
            let host_port = match spec.host_port {
                Some(port) => port,
                None => ports.allocate(position).ok_or_else(|| {
                    CatalogError::Invalid(format!(
                        "port allocator range {}-{} exhausted at service '{}'",
                        ports.start_port, ports.end_port, key
                    ))
                })?,
            };

            services.push(ServiceDefinition {
                key,
                name: spec.name.clone(),
                description: spec.description.clone(),
                project_url: spec.project_url.clone(),
                icon: spec.icon.clone(),
                tags: spec.tags.clone(),
                links: spec.links.clone(),
                image: spec.image.clone(),
                endpoint: Endpoint {
                    container_port: spec.container_port,
                    host_port,
                    live_url_template: spec.live_url_template.clone(),
                },
            });
        }
        Self::new(services)
    }

    /// All definitions in registry order.
    pub fn list(&self) -> &[ServiceDefinition] {
        &self.services
    }

    pub fn get(&self, key: &str) -> Result<&ServiceDefinition, CatalogError> {
        self.index
            .get(key)
            .map(|&position| &self.services[position])
            .ok_or_else(|| CatalogError::NotFound(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(key: &str, host_port: Option<u16>) -> ServiceSpec {
        ServiceSpec {
            key: key.to_string(),
            name: key.to_uppercase(),
            description: String::new(),
            project_url: String::new(),
            icon: String::new(),
            tags: vec![],
            links: vec![],
            image: None,
            container_port: None,
            host_port,
            live_url_template: "http://{host}:{port}".to_string(),
        }
    }

    #[test]
    fn test_list_preserves_registry_order() {
        let ports = PortAllocatorConfig::default();
        let catalog =
            ServiceCatalog::from_specs(&[spec("plex", Some(32400)), spec("jellyfin", None)], &ports)
                .unwrap();
        let keys: Vec<_> = catalog.list().iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["plex", "jellyfin"]);
    }

    #[test]
    fn test_get_unknown_key_is_not_found() {
        let catalog = ServiceCatalog::from_specs(&[spec("plex", Some(32400))], &PortAllocatorConfig::default()).unwrap();
        assert_eq!(
            catalog.get("emby").unwrap_err(),
            CatalogError::NotFound("emby".to_string())
        );
    }

    #[test]
    fn test_allocator_assigns_ports_by_position() {
        let ports = PortAllocatorConfig { start_port: 30000, end_port: 30010 };
        let catalog =
            ServiceCatalog::from_specs(&[spec("plex", Some(32400)), spec("gitea", None)], &ports).unwrap();
        let gitea = catalog.get("gitea").unwrap();
        assert_eq!(gitea.endpoint.host_port, 30001);
        assert_eq!(gitea.endpoint.live_url("localhost"), "http://localhost:30001");
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let result = ServiceCatalog::from_specs(
            &[spec("plex", Some(1)), spec("plex", Some(2))],
            &PortAllocatorConfig::default(),
        );
        assert!(matches!(result, Err(CatalogError::Invalid(_))));
    }

    #[test]
    fn test_key_validation() {
        assert!(ServiceKey::parse("home-assistant").is_ok());
        assert!(ServiceKey::parse("Plex").is_err());
        assert!(ServiceKey::parse("").is_err());
        assert!(ServiceKey::parse("-plex").is_err());
        assert!(ServiceKey::parse("../etc").is_err());
    }
}
