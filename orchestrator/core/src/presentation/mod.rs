// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`seedling-core`)
//!
//! HTTP surface that translates external requests into application service
//! calls. **No business logic lives here**; all real work is delegated to
//! application services in `crate::application`.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | Axum router and handlers for `/v1/users` and `/v1/services` |
//! | [`auth`] | Bearer token extractor |
//! | [`error`] | `ApiError` and its status/envelope mapping |
//! | [`dto`] | Request and response bodies |

pub mod api;
pub mod auth;
pub mod dto;
pub mod error;

pub use api::{app, AppState};
pub use error::ApiError;
