//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST resource, the three WebSocket endpoints, and the
//! OpenAPI documentation.

use crate::{
    handlers,
    models::{ErrorResponse, HealthResponse},
    state::AppState,
    ws::{self, TransportStyle},
};

use axum::{Router, routing::get};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::find_value, handlers::health),
    components(schemas(ErrorResponse, HealthResponse)),
    tags(
        (name = "Confirmation Agent API", description = "Value resource backing the confirmation agent")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/resource/value", get(handlers::find_value))
        .route("/health", get(handlers::health))
        .route(
            TransportStyle::Blocking.path(),
            get(ws::non_reactive_handler),
        )
        .route(
            TransportStyle::ReactiveUni.path(),
            get(ws::reactive_uni_handler),
        )
        .route(
            TransportStyle::ReactiveMulti.path(),
            get(ws::reactive_multi_handler),
        )
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
