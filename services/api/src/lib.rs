//! Confirmation Agent API Library Crate
//!
//! This library contains the web-facing half of the confirmation agent:
//! configuration, shared application state, caller identity extraction, the
//! REST value resource, the three WebSocket transports, and routing. The
//! `api` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
