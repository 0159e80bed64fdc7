// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Seedling
//!
//! The `seedling` binary runs the home server app store backend and offers
//! a few operator commands.
//!
//! ## Commands
//!
//! - `seedling serve` - Run the HTTP API
//! - `seedling config show|validate|generate` - Configuration management
//! - `seedling user create` - Add an account to the configured store

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use seedling_cli::commands::{self, ConfigCommand, UserCommand};
use seedling_cli::daemon;
use seedling_core::domain::config::{ObservabilityConfig, SeedlingConfig};

/// Seedling - self-hosted app store backend
#[derive(Parser)]
#[command(name = "seedling")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "SEEDLING_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the config value
    #[arg(long, global = true, env = "SEEDLING_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server
    #[command(name = "serve")]
    Serve(ServeArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Account management
    #[command(name = "user")]
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Bind address (overrides spec.server.bind_address)
    #[arg(long, env = "SEEDLING_HOST")]
    host: Option<String>,

    /// Listen port (overrides spec.server.port)
    #[arg(long, env = "SEEDLING_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Logging is configured before the config is loaded "for real", so peek
    // at the observability section here and fall back to defaults.
    let observability = SeedlingConfig::load_or_default(cli.config.clone())
        .map(|c| c.spec.observability)
        .unwrap_or_default();
    init_logging(
        cli.log_level.as_deref().unwrap_or(&observability.log_level),
        &observability,
    )?;

    match cli.command {
        Commands::Serve(args) => serve(cli.config, args).await,
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
        Commands::User { command } => commands::user::handle_command(command, cli.config).await,
    }
}

async fn serve(config_path: Option<PathBuf>, args: ServeArgs) -> Result<()> {
    let mut config = SeedlingConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.spec.server.bind_address = host;
    }
    if let Some(port) = args.port {
        config.spec.server.port = port;
    }
    config
        .validate()
        .context("Configuration validation failed")?;

    daemon::start_server(config).await
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, observability: &ObservabilityConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if observability.log_format == "json" {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
