// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Authentication and Sessions
//!
//! Email/password login issuing opaque bearer tokens. Only the SHA-256
//! digest of a token is stored, so a leaked session table cannot be replayed.
//! Password hashing runs on the blocking pool.

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::domain::repository::{RepositoryError, SessionRepository, UserRepository};
use crate::domain::user::{AuthError, IssuedSession, NewUser, Session, User, UserId};
use crate::infrastructure::credentials;

const MIN_PASSWORD_LEN: usize = 8;

#[async_trait]
pub trait AuthService: Send + Sync {
    /// Check credentials and open a session. Unknown email and wrong password
    /// are indistinguishable.
    async fn authenticate(&self, email: &str, password: &str) -> Result<IssuedSession, AuthError>;

    /// Resolve a bearer token to its user. Expired sessions are evicted.
    async fn validate(&self, token: &str) -> Result<UserId, AuthError>;

    /// Self-service signup, subject to `allow_registration`.
    async fn register(&self, new_user: NewUser) -> Result<User, AuthError>;

    /// Create an account regardless of the registration switch.
    async fn create_user(&self, new_user: NewUser) -> Result<User, AuthError>;

    async fn current_user(&self, id: UserId) -> Result<User, AuthError>;

    async fn logout(&self, token: &str) -> Result<(), AuthError>;

    /// Create the bootstrap account unless its email is already registered.
    /// Returns the new user when one was created.
    async fn ensure_admin(&self, seed: NewUser) -> Result<Option<User>, AuthError>;

    async fn purge_expired(&self) -> Result<u64, AuthError>;
}

pub struct StandardAuthService {
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionRepository>,
    session_ttl: TimeDelta,
    allow_registration: bool,
    dummy_hash: OnceCell<String>,
}

impl StandardAuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        sessions: Arc<dyn SessionRepository>,
        session_ttl: Duration,
        allow_registration: bool,
    ) -> Self {
        Self {
            users,
            sessions,
            session_ttl: TimeDelta::from_std(session_ttl).unwrap_or_else(|_| TimeDelta::days(30)),
            allow_registration,
            dummy_hash: OnceCell::new(),
        }
    }

    /// Hash verified when the email is unknown, so both failure paths cost
    /// one argon2 verification.
    async fn dummy_hash(&self) -> Result<&str, AuthError> {
        self.dummy_hash
            .get_or_try_init(|| hash("seedling-dummy-password".to_string()))
            .await
            .map(String::as_str)
    }
}

async fn hash(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || credentials::hash_password(&password))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
        .map_err(AuthError::Hashing)
}

async fn verify(password: String, phc: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || credentials::verify_password(&password, &phc))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

fn validate_new_user(new_user: &NewUser) -> Result<(), AuthError> {
    let email = new_user.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AuthError::Invalid(format!("'{}' is not an email address", email)));
    }
    if new_user.username.trim().is_empty() {
        return Err(AuthError::Invalid("username cannot be empty".into()));
    }
    if new_user.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Invalid(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

#[async_trait]
impl AuthService for StandardAuthService {
    async fn authenticate(&self, email: &str, password: &str) -> Result<IssuedSession, AuthError> {
        let user = self.users.find_by_email(email.trim()).await?;
        let phc = match &user {
            Some(user) => user.password_hash.clone(),
            None => self.dummy_hash().await?.to_string(),
        };
        let verified = verify(password.to_string(), phc).await?;

        let user = match user {
            Some(user) if verified => user,
            _ => {
                debug!("Rejected login attempt");
                return Err(AuthError::InvalidCredentials);
            }
        };

        let token = credentials::generate_token();
        let now = Utc::now();
        let session = Session {
            token_digest: credentials::digest_token(&token),
            user_id: user.id,
            created_at: now,
            expires_at: now + self.session_ttl,
        };
        self.sessions.save(&session).await?;

        info!(user_id = %user.id, "User logged in");
        Ok(IssuedSession {
            token,
            session,
            user,
        })
    }

    async fn validate(&self, token: &str) -> Result<UserId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Unauthenticated);
        }
        let digest = credentials::digest_token(token);
        let session = self
            .sessions
            .find(&digest)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        if session.is_expired(Utc::now()) {
            self.sessions.delete(&digest).await?;
            debug!(user_id = %session.user_id, "Evicted expired session");
            return Err(AuthError::Expired);
        }
        Ok(session.user_id)
    }

    async fn register(&self, new_user: NewUser) -> Result<User, AuthError> {
        if !self.allow_registration {
            return Err(AuthError::RegistrationDisabled);
        }
        self.create_user(new_user).await
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, AuthError> {
        validate_new_user(&new_user)?;

        let user = User {
            id: UserId::new(),
            email: new_user.email.trim().to_lowercase(),
            username: new_user.username.trim().to_string(),
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            password_hash: hash(new_user.password).await?,
            created_at: Utc::now(),
        };

        match self.users.create(&user).await {
            Ok(()) => {}
            Err(RepositoryError::Duplicate(what)) => {
                return Err(AuthError::Conflict(format!("user already exists ({})", what)))
            }
            Err(e) => return Err(e.into()),
        }

        info!(user_id = %user.id, username = %user.username, "User created");
        Ok(user)
    }

    async fn current_user(&self, id: UserId) -> Result<User, AuthError> {
        // A session whose user disappeared is as good as no session.
        self.users
            .find_by_id(id)
            .await?
            .ok_or(AuthError::Unauthenticated)
    }

    async fn logout(&self, token: &str) -> Result<(), AuthError> {
        self.sessions.delete(&credentials::digest_token(token)).await?;
        Ok(())
    }

    async fn ensure_admin(&self, seed: NewUser) -> Result<Option<User>, AuthError> {
        if self.users.find_by_email(seed.email.trim()).await?.is_some() {
            debug!("Admin account {} already present", seed.email);
            return Ok(None);
        }
        self.create_user(seed).await.map(Some)
    }

    async fn purge_expired(&self) -> Result<u64, AuthError> {
        Ok(self.sessions.delete_expired(Utc::now()).await?)
    }
}
