// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP routes under `/v1`.
//!
//! Every route except login, registration and health takes an
//! [`AuthenticatedUser`], so the bearer token is checked before any other
//! work happens.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::application::auth::AuthService;
use crate::application::directory::{InstalledServiceView, ServiceDetail, ServiceDirectory, ServiceView};
use crate::application::lifecycle::LifecycleService;
use crate::domain::user::{NewUser, User};
use crate::presentation::auth::AuthenticatedUser;
use crate::presentation::dto::{ApiResponse, HealthResponse, InstallRequest, LoginRequest, LoginResponse};
use crate::presentation::error::ApiError;

pub struct AppState {
    pub auth: Arc<dyn AuthService>,
    pub lifecycle: Arc<dyn LifecycleService>,
    pub directory: Arc<ServiceDirectory>,
    pub started_at: Instant,
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn app(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/users", post(register).get(current_user))
        .route("/v1/users/login", post(login))
        .route("/v1/users/logout", post(logout))
        .route("/v1/services/info", get(list_services))
        .route("/v1/services/info/{key}", get(service_info))
        .route("/v1/services/installed", get(list_installed))
        .route("/v1/services/installed/{key}", get(installed_service))
        .route("/v1/services/install", post(install))
        .route("/v1/services/stop/{key}", post(stop))
        .route("/v1/services/uninstall/{key}", post(uninstall))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(request) = payload?;
    let issued = state.auth.authenticate(&request.email, &request.password).await?;
    Ok(Json(LoginResponse {
        ok: true,
        token: issued.token,
        expires_at: issued.session.expires_at,
        data: issued.user,
    }))
}

async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(new_user) = payload?;
    let user = state.auth.register(new_user).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(user))))
}

async fn current_user(State(state): State<Arc<AppState>>, auth: AuthenticatedUser) -> ApiResult<User> {
    let user = state.auth.current_user(auth.user_id).await?;
    Ok(Json(ApiResponse::ok(user)))
}

async fn logout(State(state): State<Arc<AppState>>, auth: AuthenticatedUser) -> ApiResult<()> {
    state.auth.logout(&auth.token).await?;
    Ok(Json(ApiResponse::ok(())))
}

async fn list_services(State(state): State<Arc<AppState>>, _auth: AuthenticatedUser) -> ApiResult<Vec<ServiceView>> {
    Ok(Json(ApiResponse::ok(state.directory.list_services().await?)))
}

async fn service_info(
    State(state): State<Arc<AppState>>,
    _auth: AuthenticatedUser,
    Path(key): Path<String>,
) -> ApiResult<ServiceDetail> {
    Ok(Json(ApiResponse::ok(state.directory.service(&key).await?)))
}

async fn list_installed(
    State(state): State<Arc<AppState>>,
    _auth: AuthenticatedUser,
) -> ApiResult<Vec<InstalledServiceView>> {
    Ok(Json(ApiResponse::ok(state.directory.installed().await?)))
}

async fn installed_service(
    State(state): State<Arc<AppState>>,
    _auth: AuthenticatedUser,
    Path(key): Path<String>,
) -> ApiResult<InstalledServiceView> {
    Ok(Json(ApiResponse::ok(state.directory.installed_service(&key).await?)))
}

async fn install(
    State(state): State<Arc<AppState>>,
    auth: AuthenticatedUser,
    payload: Result<Json<InstallRequest>, JsonRejection>,
) -> ApiResult<InstalledServiceView> {
    let Json(request) = payload?;
    let row = state.lifecycle.install(&request.key, Some(auth.user_id)).await?;
    Ok(Json(ApiResponse::ok(state.directory.view(&row)?)))
}

async fn stop(
    State(state): State<Arc<AppState>>,
    _auth: AuthenticatedUser,
    Path(key): Path<String>,
) -> ApiResult<InstalledServiceView> {
    let row = state.lifecycle.stop(&key).await?;
    Ok(Json(ApiResponse::ok(state.directory.view(&row)?)))
}

async fn uninstall(
    State(state): State<Arc<AppState>>,
    _auth: AuthenticatedUser,
    Path(key): Path<String>,
) -> ApiResult<()> {
    state.lifecycle.uninstall(&key).await?;
    Ok(Json(ApiResponse::ok(())))
}
