// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Account management commands
//!
//! Commands: create

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Password;
use std::path::PathBuf;

use seedling_core::application::{create_repositories, AuthService, StandardAuthService};
use seedling_core::domain::config::{SeedlingConfig, StorageConfig};
use seedling_core::domain::user::NewUser;

#[derive(Subcommand)]
pub enum UserCommand {
    /// Create an account in the configured store
    Create {
        #[arg(long)]
        email: String,

        #[arg(long)]
        username: String,

        #[arg(long, default_value = "")]
        first_name: String,

        #[arg(long, default_value = "")]
        last_name: String,

        /// Password (prompted when omitted)
        #[arg(long, env = "SEEDLING_USER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

pub async fn handle_command(command: UserCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        UserCommand::Create {
            email,
            username,
            first_name,
            last_name,
            password,
        } => {
            let password = match password {
                Some(password) => password,
                None => Password::new()
                    .with_prompt("Password")
                    .with_confirmation("Confirm password", "Passwords do not match")
                    .interact()
                    .context("Failed to read password")?,
            };
            create(
                config_override,
                NewUser {
                    first_name,
                    last_name,
                    username,
                    email,
                    password,
                },
            )
            .await
        }
    }
}

async fn create(config_override: Option<PathBuf>, new_user: NewUser) -> Result<()> {
    let config = SeedlingConfig::load_or_default(config_override)
        .context("Failed to load configuration")?;
    if matches!(config.spec.storage, StorageConfig::InMemory) {
        anyhow::bail!(
            "spec.storage is in_memory, so the account would vanish when this command exits.\n\
             Configure sqlite storage, or seed the account through spec.auth.admin instead."
        );
    }
    let repositories = create_repositories(&config.spec.storage)
        .await
        .context("Failed to open storage")?;

    let auth = StandardAuthService::new(
        repositories.users,
        repositories.sessions,
        config.spec.auth.session_ttl,
        config.spec.auth.allow_registration,
    );
    let user = auth
        .create_user(new_user)
        .await
        .context("Failed to create user")?;

    println!(
        "{}",
        format!("✓ Created user {} <{}>", user.username, user.email).green()
    );
    println!("  ID: {}", user.id);
    Ok(())
}
