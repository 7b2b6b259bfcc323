//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the conversation service and configuration.

use crate::config::Config;
use confirm_core::ConversationService;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: ConversationService,
    pub config: Arc<Config>,
}
