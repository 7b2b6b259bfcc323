//! Axum Handlers for the REST API
//!
//! This module contains the REST side of the service: the protected value
//! resource that the agent's tool calls, and a health probe. It uses `utoipa`
//! doc comments to generate OpenAPI documentation.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    identity::caller_from_headers,
    models::{ErrorResponse, HealthResponse},
    state::AppState,
};

/// Roles allowed to read the value resource.
pub const VALUE_ROLES: &[&str] = &["user", "admin"];

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Forbidden(message) => {
                (StatusCode::FORBIDDEN, Json(ErrorResponse { message })).into_response()
            }
        }
    }
}

/// Look up the value on behalf of the calling user.
#[utoipa::path(
    get,
    path = "/resource/value",
    responses(
        (status = 200, description = "The value", body = i64),
        (status = 401, description = "No authenticated user", body = ErrorResponse),
        (status = 403, description = "User lacks a permitted role", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The authenticated user"),
        ("x-user-roles" = Option<String>, Header, description = "Comma separated roles of the user")
    )
)]
pub async fn find_value(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<i64>, ApiError> {
    let caller = caller_from_headers(&headers)
        .ok_or_else(|| ApiError::Unauthorized("Missing x-user-id header".to_string()))?;

    if !caller.has_any_role(VALUE_ROLES) {
        warn!(user = %caller.subject, roles = ?caller.roles, "Value request denied");
        return Err(ApiError::Forbidden(format!(
            "One of the roles {:?} is required",
            VALUE_ROLES
        )));
    }

    info!(
        user = %caller.subject,
        roles = ?caller.roles,
        "Request to find_value"
    );
    Ok(Json(state.config.resource_value))
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        sessions: state.service.store().len().await,
    })
}
