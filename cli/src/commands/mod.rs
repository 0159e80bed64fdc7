// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Seedling CLI

pub mod config;
pub mod user;

pub use self::config::ConfigCommand;
pub use self::user::UserCommand;
