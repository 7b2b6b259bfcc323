//! Confirmation-gated tool invocation.
//!
//! A conversation moves through three stages: the agent waits for the user to
//! express an intent, asks for an explicit confirmation, and only then calls
//! the side-effecting tool, at most once per confirmed intent. Transports feed
//! utterances through `ConversationService::step` and send back the reply.

pub mod classifier;
pub mod engine;
pub mod intent;
pub mod service;
pub mod session;
pub mod store;
pub mod tool;

pub use classifier::{Decision, KeywordClassifier, LLMClassifier, UtteranceClassifier};
pub use engine::{ConversationEngine, StepOutcome};
pub use intent::{Intent, IntentCatalog, TriggerMatcher};
pub use service::{BusyPolicy, ConversationService, Reply};
pub use session::{IntentId, Session, Stage, StageKind, ToolValue, Turn};
pub use store::{SessionGuard, SessionStore};
pub use tool::{Caller, RestValueInvoker, ToolContext, ToolError, ToolInvoker};
