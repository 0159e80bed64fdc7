// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod credentials;
pub mod db;
pub mod executor;
pub mod repositories;

pub use db::Database;
pub use executor::{build_executor, DockerExecutor, SimulatedExecutor};
