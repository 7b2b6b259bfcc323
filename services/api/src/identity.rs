//! Caller identity as handed to us by the fronting proxy.
//!
//! Authentication happens upstream; this service only reads the resulting
//! headers, checks role membership, and forwards the access token.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use confirm_core::Caller;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLES_HEADER: &str = "x-user-roles";

/// Builds a `Caller` from request headers, or `None` if no user is present.
pub fn caller_from_headers(headers: &HeaderMap) -> Option<Caller> {
    let subject = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())?
        .to_string();

    let roles = headers
        .get(USER_ROLES_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let bearer_token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());

    Some(Caller {
        subject,
        roles,
        bearer_token,
    })
}
