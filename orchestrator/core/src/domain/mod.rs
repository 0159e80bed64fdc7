// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Service catalog, installation state machine, users and sessions, and the
//! ports (repositories, executor) the application layer depends on.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types and invariants; no I/O

pub mod catalog;
pub mod config;
pub mod executor;
pub mod installation;
pub mod repository;
pub mod user;
