//! The side-effecting tool gated behind confirmation.

use crate::session::{IntentId, ToolValue};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{info, instrument};

/// Identity of whoever drives the conversation.
///
/// The core never resolves or validates identity; callers hand in an already
/// authorized `Caller` and it is forwarded to the tool as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    pub subject: String,
    pub roles: Vec<String>,
    /// Access token propagated to downstream calls.
    pub bearer_token: Option<String>,
}

impl Caller {
    pub fn new(subject: impl Into<String>, roles: &[&str]) -> Self {
        Self {
            subject: subject.into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            bearer_token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|r| self.has_role(r))
    }
}

/// Everything a tool needs to serve one confirmed intent.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub intent: IntentId,
    pub caller: Caller,
}

/// Failures a tool invocation can report.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool call timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("caller is not authorized: {0}")]
    Unauthorized(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("upstream responded with status {status}")]
    Upstream { status: u16 },
    #[error("malformed tool response: {0}")]
    Malformed(String),
}

impl ToolError {
    /// Whether a later attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ToolError::Timeout(_) | ToolError::Transport(_) => true,
            ToolError::Upstream { status } => *status >= 500,
            ToolError::Unauthorized(_) | ToolError::NotFound(_) | ToolError::Malformed(_) => {
                false
            }
        }
    }
}

/// Performs the action behind a confirmed intent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, ctx: &ToolContext) -> Result<ToolValue, ToolError>;
}

/// Path of the value resource relative to `RestValueInvoker::base_url`.
pub const VALUE_PATH: &str = "/resource/value";

/// Fetches a value from the REST value resource on behalf of the caller.
pub struct RestValueInvoker {
    client: reqwest::Client,
    base_url: String,
}

impl RestValueInvoker {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, VALUE_PATH)
    }
}

#[async_trait]
impl ToolInvoker for RestValueInvoker {
    #[instrument(name = "find_value", skip_all, fields(session_id = %ctx.session_id, user = %ctx.caller.subject))]
    async fn invoke(&self, ctx: &ToolContext) -> Result<ToolValue, ToolError> {
        info!(roles = ?ctx.caller.roles, "Requesting value from REST endpoint");

        let mut request = self
            .client
            .get(self.endpoint())
            .header("x-user-id", &ctx.caller.subject)
            .header("x-user-roles", ctx.caller.roles.join(","));
        if let Some(token) = &ctx.caller.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ToolError::Unauthorized(format!(
                    "{} rejected {}",
                    VALUE_PATH, ctx.caller.subject
                )));
            }
            StatusCode::NOT_FOUND => return Err(ToolError::NotFound(self.endpoint())),
            s => return Err(ToolError::Upstream { status: s.as_u16() }),
        }

        let value: ToolValue = response
            .json()
            .await
            .map_err(|e| ToolError::Malformed(e.to_string()))?;
        if value.is_null() {
            return Err(ToolError::Malformed("value was null".to_string()));
        }

        info!(%value, "Value found");
        Ok(value)
    }
}
