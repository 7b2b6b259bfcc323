//! Per-conversation state.
//!
//! A `Session` is owned by the `SessionStore` and lent to the engine for the
//! duration of a single step. The stage carries its own data so that a cached
//! tool result can only exist while the session is fulfilled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The value returned by a tool invocation.
pub type ToolValue = serde_json::Value;

/// Identifies an intent within the `IntentCatalog`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntentId(pub String);

impl IntentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a conversation currently stands for its active intent cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    /// Waiting for the user to express an intent. `offered` is set when the
    /// previous reply offered an intent to the user.
    AwaitingIntent { offered: Option<IntentId> },
    /// The user expressed `intent` and was asked to confirm it.
    AwaitingConfirmation { intent: IntentId },
    /// The tool ran for `intent` and returned `result`.
    Fulfilled { intent: IntentId, result: ToolValue },
}

impl Default for Stage {
    fn default() -> Self {
        Stage::AwaitingIntent { offered: None }
    }
}

/// Fieldless view of a `Stage`, handy for logging and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    AwaitingIntent,
    AwaitingConfirmation,
    Fulfilled,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::AwaitingIntent => write!(f, "awaiting_intent"),
            StageKind::AwaitingConfirmation => write!(f, "awaiting_confirmation"),
            StageKind::Fulfilled => write!(f, "fulfilled"),
        }
    }
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::AwaitingIntent { .. } => StageKind::AwaitingIntent,
            Stage::AwaitingConfirmation { .. } => StageKind::AwaitingConfirmation,
            Stage::Fulfilled { .. } => StageKind::Fulfilled,
        }
    }
}

/// One logical conversation, keyed by a caller-supplied memory id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub stage: Stage,
    /// Number of completed steps.
    pub turns: u64,
    pub last_active: DateTime<Utc>,
}

impl Session {
    /// Creates a fresh session in `AwaitingIntent`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stage: Stage::default(),
            turns: 0,
            last_active: Utc::now(),
        }
    }

    pub fn stage_kind(&self) -> StageKind {
        self.stage.kind()
    }

    /// The intent that would be (or was) confirmed in the current cycle.
    pub fn pending_intent(&self) -> Option<&IntentId> {
        match &self.stage {
            Stage::AwaitingIntent { .. } => None,
            Stage::AwaitingConfirmation { intent } | Stage::Fulfilled { intent, .. } => {
                Some(intent)
            }
        }
    }

    /// The cached result of the last successful tool call, if fulfilled.
    pub fn last_tool_result(&self) -> Option<&ToolValue> {
        match &self.stage {
            Stage::Fulfilled { result, .. } => Some(result),
            _ => None,
        }
    }
}

/// A single exchange with the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub utterance: String,
    pub reply: String,
    /// Whether the tool was called (successfully or not) during this turn.
    pub tool_invoked: bool,
}

/// Renders a tool value for inclusion in a user-facing reply.
pub fn render_value(value: &ToolValue) -> String {
    match value {
        ToolValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
