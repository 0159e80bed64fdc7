// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use seedling_core::domain::catalog::ServiceCatalog;
use seedling_core::domain::config::{ExecutorConfig, SeedlingConfig, StorageConfig};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with every default spelled out
    Generate {
        /// Output path (default: ./seedling-config.yaml)
        #[arg(short, long, default_value = "./seedling-config.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, force } => generate(output, force).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = SeedlingConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. SEEDLING_CONFIG_PATH: {}",
            std::env::var("SEEDLING_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./seedling-config.yaml");
        println!("  4. ~/.seedling/config.yaml");
        println!("  5. /etc/seedling/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Node:".bold());
    println!("  Name: {}", config.metadata.name);
    println!(
        "  API: {}:{} (public host {})",
        spec.server.bind_address, spec.server.port, spec.server.public_host
    );
    println!();

    println!("{}", "Storage:".bold());
    match &spec.storage {
        StorageConfig::InMemory => println!("  Backend: in-memory"),
        StorageConfig::Sqlite { database_url } => println!("  Backend: sqlite ({})", database_url),
    }
    println!();

    println!("{}", "Lifecycle:".bold());
    println!(
        "  Install timeout: {}s",
        spec.lifecycle.install_timeout.as_secs()
    );
    match &spec.executor {
        ExecutorConfig::Docker(docker) => println!(
            "  Executor: docker (prefix {}, autopull {})",
            docker.container_prefix, docker.autopull
        ),
        ExecutorConfig::Simulated(sim) => println!(
            "  Executor: simulated (delay {}ms)",
            sim.delay.as_millis()
        ),
    }
    println!();

    println!("{}", "Auth:".bold());
    println!("  Session TTL: {}h", spec.auth.session_ttl.as_secs() / 3600);
    println!("  Registration: {}", if spec.auth.allow_registration { "open" } else { "closed" });
    if let Some(admin) = &spec.auth.admin {
        println!("  Admin seed: {}", admin.email);
    }
    println!();

    println!("{}", "Services:".bold());
    match ServiceCatalog::from_specs(&spec.services, &spec.port_allocator) {
        Ok(catalog) => {
            for service in catalog.list() {
                println!(
                    "  {} ({}) → {}",
                    service.name.bold(),
                    service.key,
                    service.endpoint.live_url(&spec.server.public_host)
                );
            }
        }
        Err(e) => println!("  {}", format!("invalid catalog: {}", e).red()),
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = SeedlingConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }

    SeedlingConfig::default()
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_writes_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("seedling-config.yaml");

        generate(output.clone(), false).await.unwrap();
        let config = SeedlingConfig::from_yaml_file(&output).unwrap();
        config.validate().unwrap();

        // Refuses to clobber without --force
        assert!(generate(output.clone(), false).await.is_err());
        generate(output, true).await.unwrap();
    }
}
