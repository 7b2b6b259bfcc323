//! API Models
//!
//! Request and response bodies shared by the REST handlers and the OpenAPI
//! document generated with `utoipa`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct HealthResponse {
    pub status: String,
    /// Number of conversations currently held in memory.
    pub sessions: usize,
}

/// Query parameters accepted when opening a WebSocket.
#[derive(Deserialize, Debug, Default)]
pub struct ConnectParams {
    /// Conversation memory key; a fresh one is generated when absent.
    pub memory_id: Option<String>,
}
