// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Installation Aggregate
//!
//! Mutable per-service lifecycle record. One row per service key; a key
//! without a row is implicitly [`InstallState::NotInstalled`].
//!
//! ## State Graph
//!
//! ```text
//! NotInstalled ──▶ Installing ──▶ Running ──▶ Stopped
//!      ▲              │  ▲                     │  │
//!      │              ▼  └─────────────────────┘  │
//!      ├───────────  Failed ──▶ Installing        │
//!      └──────────────────────────────────────────┘
//! ```
//!
//! Every entry into `Installing` starts a new attempt and bumps the attempt
//! id. Results reported for any other attempt are fenced out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::catalog::ServiceKey;
use crate::domain::user::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    NotInstalled,
    Installing,
    Running,
    Stopped,
    Failed,
}

impl InstallState {
    pub const ALL: [InstallState; 5] = [
        InstallState::NotInstalled,
        InstallState::Installing,
        InstallState::Running,
        InstallState::Stopped,
        InstallState::Failed,
    ];

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: InstallState) -> bool {
        use InstallState::*;
        matches!(
            (self, next),
            (NotInstalled, Installing)
                | (Installing, Running)
                | (Installing, Failed)
                | (Running, Stopped)
                | (Stopped, Installing)
                | (Failed, Installing)
                | (Stopped, NotInstalled)
                | (Failed, NotInstalled)
        )
    }

    /// States from which `self` can be entered.
    pub fn predecessors(self) -> Vec<InstallState> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(self))
            .collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstallState::NotInstalled => "not_installed",
            InstallState::Installing => "installing",
            InstallState::Running => "running",
            InstallState::Stopped => "stopped",
            InstallState::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == raw)
    }

    /// A new install attempt may start from this state.
    pub fn accepts_install(self) -> bool {
        self.can_transition_to(InstallState::Installing)
    }
}

impl std::fmt::Display for InstallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monotonic per-key install attempt identifier. `0` means "never attempted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(pub u64);

impl AttemptId {
    pub const NONE: AttemptId = AttemptId(0);

    pub fn next(self) -> AttemptId {
        AttemptId(self.0 + 1)
    }
}

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The external executor reported an error
    Execution,
    /// The attempt exceeded the install timeout
    Timeout,
    /// The attempt was cut short by a shutdown or restart
    Interrupted,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Execution => "execution",
            FailureKind::Timeout => "timeout",
            FailureKind::Interrupted => "interrupted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "execution" => Some(FailureKind::Execution),
            "timeout" => Some(FailureKind::Timeout),
            "interrupted" => Some(FailureKind::Interrupted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl InstallFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstallation {
    pub key: ServiceKey,
    pub state: InstallState,
    pub attempt: AttemptId,
    pub live_url: Option<String>,
    pub last_error: Option<InstallFailure>,
    pub installed_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceInstallation {
    /// The record returned for keys that have never been installed.
    pub fn not_installed(key: ServiceKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            state: InstallState::NotInstalled,
            attempt: AttemptId::NONE,
            live_url: None,
            last_error: None,
            installed_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an already-guarded transition to this record.
    ///
    /// Callers must have checked [`Transition::permits`] against the current
    /// state; this only writes the fields.
    pub fn apply(&mut self, transition: &Transition, now: DateTime<Utc>) {
        if transition.to == InstallState::Installing {
            self.attempt = self.attempt.next();
            self.installed_by = transition.installed_by;
        }
        self.state = transition.to;
        self.live_url = transition.live_url.clone();
        self.last_error = transition.last_error.clone();
        self.updated_at = now;
    }
}

/// Which current states a transition is willing to start from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    Any,
    OneOf(Vec<InstallState>),
}

/// A guarded state change for one key.
///
/// The effective precondition is `expected ∩ predecessors(to)`: even with
/// [`Expected::Any`] the lifecycle graph is enforced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub to: InstallState,
    pub expected: Expected,
    /// When set, the row's current attempt must equal this value.
    pub fence: Option<AttemptId>,
    pub live_url: Option<String>,
    pub last_error: Option<InstallFailure>,
    pub installed_by: Option<UserId>,
}

impl Transition {
    pub fn to(state: InstallState) -> Self {
        Self {
            to: state,
            expected: Expected::Any,
            fence: None,
            live_url: None,
            last_error: None,
            installed_by: None,
        }
    }

    pub fn from(mut self, states: &[InstallState]) -> Self {
        self.expected = Expected::OneOf(states.to_vec());
        self
    }

    pub fn fenced(mut self, attempt: AttemptId) -> Self {
        self.fence = Some(attempt);
        self
    }

    pub fn with_live_url(mut self, url: impl Into<String>) -> Self {
        self.live_url = Some(url.into());
        self
    }

    pub fn with_error(mut self, failure: InstallFailure) -> Self {
        self.last_error = Some(failure);
        self
    }

    pub fn by(mut self, user: UserId) -> Self {
        self.installed_by = Some(user);
        self
    }

    /// States the row may currently be in for this transition to apply.
    pub fn allowed_sources(&self) -> Vec<InstallState> {
        let graph = self.to.predecessors();
        match &self.expected {
            Expected::Any => graph,
            Expected::OneOf(states) => graph.into_iter().filter(|s| states.contains(s)).collect(),
        }
    }

    pub fn permits(&self, current: InstallState, attempt: AttemptId) -> bool {
        self.allowed_sources().contains(&current) && self.fence.map_or(true, |f| f == attempt)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Cannot move '{key}' from {current} (attempt {attempt}) to {requested}")]
    Conflict {
        key: String,
        current: InstallState,
        attempt: AttemptId,
        requested: InstallState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use InstallState::*;

    #[test]
    fn test_permitted_graph() {
        let allowed = [
            (NotInstalled, Installing),
            (Installing, Running),
            (Installing, Failed),
            (Running, Stopped),
            (Stopped, Installing),
            (Failed, Installing),
            (Stopped, NotInstalled),
            (Failed, NotInstalled),
        ];
        for from in InstallState::ALL {
            for to in InstallState::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_nothing_skips_installing_from_not_installed() {
        for to in [Running, Stopped, Failed] {
            assert!(!NotInstalled.can_transition_to(to));
        }
    }

    #[test]
    fn test_expected_intersects_graph() {
        let t = Transition::to(Installing).from(&[NotInstalled, Running]);
        assert_eq!(t.allowed_sources(), vec![NotInstalled]);
        assert!(t.permits(NotInstalled, AttemptId::NONE));
        assert!(!t.permits(Running, AttemptId::NONE));
    }

    #[test]
    fn test_fence_requires_matching_attempt() {
        let t = Transition::to(Running).fenced(AttemptId(2));
        assert!(t.permits(Installing, AttemptId(2)));
        assert!(!t.permits(Installing, AttemptId(1)));
    }

    #[test]
    fn test_apply_bumps_attempt_on_installing() {
        let key = crate::domain::catalog::ServiceKey::parse("plex").unwrap();
        let mut row = ServiceInstallation::not_installed(key);
        row.apply(&Transition::to(Installing), Utc::now());
        assert_eq!(row.attempt, AttemptId(1));
        row.apply(&Transition::to(Failed).with_error(InstallFailure::new(FailureKind::Timeout, "slow")), Utc::now());
        assert_eq!(row.attempt, AttemptId(1));
        assert_eq!(row.last_error.as_ref().map(|e| e.kind), Some(FailureKind::Timeout));
        row.apply(&Transition::to(Installing), Utc::now());
        assert_eq!(row.attempt, AttemptId(2));
        assert!(row.last_error.is_none());
    }

    #[test]
    fn test_state_string_roundtrip() {
        for state in InstallState::ALL {
            assert_eq!(InstallState::parse(state.as_str()), Some(state));
        }
        assert_eq!(InstallState::parse("uninstalled"), None);
    }
}
