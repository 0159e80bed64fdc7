// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod auth;
pub mod directory;
pub mod lifecycle;
pub mod repository_factory;

// Re-export use cases for convenience
pub use auth::{AuthService, StandardAuthService};
pub use directory::{InstalledServiceView, ServiceDetail, ServiceDirectory, ServiceView};
pub use lifecycle::{
    AttemptOutcome, LifecycleError, LifecycleService, Reconciliation, StandardLifecycleService,
};
pub use repository_factory::{create_repositories, Repositories};
