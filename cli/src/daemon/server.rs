// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Daemon HTTP server implementation

use anyhow::{Context, Result};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use seedling_core::{
    application::{
        create_repositories, AuthService, LifecycleService, Repositories, ServiceDirectory,
        StandardAuthService, StandardLifecycleService,
    },
    domain::{
        catalog::ServiceCatalog,
        config::SeedlingConfig,
        executor::ServiceExecutor,
        user::NewUser,
    },
    infrastructure::build_executor,
    presentation::{app, AppState},
};

/// Fully wired services for one node.
pub struct Node {
    pub config: SeedlingConfig,
    pub state: Arc<AppState>,
    pub lifecycle: Arc<StandardLifecycleService>,
}

impl Node {
    pub fn router(&self) -> Router {
        app(self.state.clone(), &self.config.spec.server.cors_origins)
    }
}

/// Wire catalog, stores, executor and services from configuration, then
/// seed the admin account and settle installs interrupted by a restart.
pub async fn build_node(config: SeedlingConfig) -> Result<Node> {
    let catalog = Arc::new(
        ServiceCatalog::from_specs(&config.spec.services, &config.spec.port_allocator)
            .context("Invalid service catalog")?,
    );
    info!("Catalog loaded with {} services", catalog.len());

    let Repositories {
        installations,
        users,
        sessions,
    } = create_repositories(&config.spec.storage)
        .await
        .context("Failed to open storage")?;

    let executor = build_executor(&config.spec.executor, &config.spec.server.public_host)
        .await
        .context("Failed to initialize service executor")?;
    info!("Using {} executor", executor.name());

    let lifecycle = Arc::new(StandardLifecycleService::new(
        catalog.clone(),
        installations.clone(),
        executor,
        config.spec.lifecycle.install_timeout,
    ));
    let auth = Arc::new(StandardAuthService::new(
        users,
        sessions,
        config.spec.auth.session_ttl,
        config.spec.auth.allow_registration,
    ));
    let directory = Arc::new(ServiceDirectory::new(catalog, installations));

    if let Some(seed) = &config.spec.auth.admin {
        let password = seed
            .resolve_password()
            .context("Failed to resolve admin password")?;
        let created = auth
            .ensure_admin(NewUser {
                first_name: String::new(),
                last_name: String::new(),
                username: seed.username.clone(),
                email: seed.email.clone(),
                password,
            })
            .await
            .context("Failed to seed admin account")?;
        if let Some(user) = created {
            info!("Created admin account {}", user.email);
        }
    }

    match auth.purge_expired().await {
        Ok(0) => {}
        Ok(n) => info!("Purged {} expired sessions", n),
        Err(e) => warn!("Failed to purge expired sessions: {}", e),
    }

    if config.spec.lifecycle.recover_on_startup {
        let recovered = lifecycle
            .recover_interrupted()
            .await
            .context("Failed to recover interrupted installs")?;
        if recovered > 0 {
            warn!("Recovered {} installs interrupted by the previous shutdown", recovered);
        }
    }

    let state = Arc::new(AppState {
        auth,
        lifecycle: lifecycle.clone(),
        directory,
        started_at: Instant::now(),
    });

    Ok(Node {
        config,
        state,
        lifecycle,
    })
}

pub async fn start_server(config: SeedlingConfig) -> Result<()> {
    info!("Seedling {} starting (node: {})", env!("CARGO_PKG_VERSION"), config.metadata.name);

    let metrics = &config.spec.observability.metrics;
    if metrics.enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], metrics.port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Prometheus metrics exposed on {}", addr);
    }

    let addr = format!(
        "{}:{}",
        config.spec.server.bind_address, config.spec.server.port
    );
    let node = build_node(config).await?;

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("API listening on {}", addr);

    axum::serve(listener, node.router())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Server shutting down");
    node.lifecycle.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
