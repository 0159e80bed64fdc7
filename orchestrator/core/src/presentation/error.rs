// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::application::lifecycle::LifecycleError;
use crate::domain::user::AuthError;

/// Error returned by every handler. Maps the library's error taxonomy onto
/// status codes and the `{ ok: false, error: { code, message } }` envelope.
#[derive(Debug)]
pub enum ApiError {
    Unauthenticated,
    Expired,
    /// Login failure; rendered as plain text
    InvalidCredentials,
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    BadRequest(String),
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated | ApiError::Expired | ApiError::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "unauthenticated",
            ApiError::Expired => "session_expired",
            ApiError::InvalidCredentials => "invalid_credentials",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Internal(_) => "internal",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Unauthenticated => "Missing or invalid bearer token".to_string(),
            ApiError::Expired => "Session expired, log in again".to_string(),
            ApiError::InvalidCredentials => "Invalid email or password".to_string(),
            // Details are logged, not leaked
            ApiError::Internal(_) => "Internal server error".to_string(),
            ApiError::Forbidden(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m)
            | ApiError::BadRequest(m) => m.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::InvalidCredentials => return (status, self.message()).into_response(),
            ApiError::Internal(detail) => tracing::error!("Request failed: {}", detail),
            _ => tracing::debug!(code = self.code(), "Request rejected: {}", self.message()),
        }

        let body = json!({
            "ok": false,
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated => ApiError::Unauthenticated,
            AuthError::Expired => ApiError::Expired,
            AuthError::InvalidCredentials => ApiError::InvalidCredentials,
            AuthError::RegistrationDisabled => ApiError::Forbidden(err.to_string()),
            AuthError::Conflict(msg) => ApiError::Conflict(msg),
            AuthError::Invalid(msg) => ApiError::BadRequest(msg),
            AuthError::Repository(_) | AuthError::Hashing(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound(_) => ApiError::NotFound(err.to_string()),
            LifecycleError::Conflict(_) => ApiError::Conflict(err.to_string()),
            LifecycleError::Execution(_)
            | LifecycleError::Timeout { .. }
            | LifecycleError::Interrupted(_)
            | LifecycleError::Repository(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
