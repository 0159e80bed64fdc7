// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Server mode implementation
//!
//! Handles:
//! - Wiring configuration into stores, executor and services
//! - Admin seeding and recovery of interrupted installs
//! - Prometheus exporter
//! - Graceful shutdown

pub mod server;

pub use server::{build_node, start_server, Node};
