// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Seedling Core
//!
//! Service orchestration backend for a home-server app store: a catalog of
//! installable services, per-service installation state with compare-and-swap
//! transitions, an asynchronous install lifecycle, and the authenticated
//! HTTP API the dashboard talks to.
//!
//! # Architecture
//!
//! - **domain**: catalog, installation state graph, users, repository and executor ports
//! - **application**: lifecycle, auth and read-side services
//! - **infrastructure**: SQLite and in-memory stores, Docker and simulated executors
//! - **presentation**: axum router, extractors and error mapping

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
