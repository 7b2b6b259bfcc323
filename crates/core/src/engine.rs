//! Confirmation-gated conversation engine.
//!
//! `ConversationEngine::step` is the whole state machine: it consumes one
//! utterance, consults the classifier, calls the tool at most once, and hands
//! back the updated session together with the reply. It never retains a
//! session between calls; serialization per session id is the caller's job
//! (see `SessionStore::lock`).

use crate::{
    classifier::{Decision, UtteranceClassifier},
    intent::{Intent, IntentCatalog, TriggerMatcher},
    session::{IntentId, Session, Stage, Turn},
    tool::{Caller, ToolContext, ToolError, ToolInvoker},
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, instrument, warn};

/// Default upper bound on a single tool call.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a single `step`.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub session: Session,
    pub turn: Turn,
}

pub struct ConversationEngine {
    classifier: Arc<dyn UtteranceClassifier>,
    tool: Arc<dyn ToolInvoker>,
    catalog: IntentCatalog,
    matcher: TriggerMatcher,
    tool_timeout: Duration,
}

impl ConversationEngine {
    pub fn new(classifier: Arc<dyn UtteranceClassifier>, tool: Arc<dyn ToolInvoker>) -> Self {
        Self {
            classifier,
            tool,
            catalog: IntentCatalog::default(),
            matcher: TriggerMatcher::default(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_catalog(mut self, catalog: IntentCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_matcher(mut self, matcher: TriggerMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn catalog(&self) -> &IntentCatalog {
        &self.catalog
    }

    /// Advances `session` by one user utterance.
    ///
    /// Always produces a reply and leaves the session in a well-defined stage;
    /// classifier and tool failures are folded into the reply.
    #[instrument(skip_all, fields(session_id = %session.id, stage = %session.stage_kind()))]
    pub async fn step(&self, mut session: Session, utterance: &str, caller: &Caller) -> StepOutcome {
        let stage = std::mem::take(&mut session.stage);
        let (next, reply, tool_invoked) = match stage {
            Stage::AwaitingIntent { offered } => {
                self.on_awaiting_intent(offered, utterance).await
            }
            Stage::AwaitingConfirmation { intent } => {
                self.on_awaiting_confirmation(&session.id, intent, utterance, caller)
                    .await
            }
            Stage::Fulfilled { intent, result } => {
                let mut replay = None;
                if let Some(def) = self.catalog.get(&intent) {
                    let decision = self
                        .classifier
                        .classify(utterance, def, &def.confirmation_prompt)
                        .await;
                    if decision == Decision::Confirmed {
                        replay = Some(def.success_reply(&result));
                    }
                }
                match replay {
                    Some(reply) => {
                        debug!(%intent, "Duplicate confirmation; replaying cached result");
                        (Stage::Fulfilled { intent, result }, reply, false)
                    }
                    None => {
                        debug!(%intent, "New utterance after fulfillment; starting a new cycle");
                        self.on_awaiting_intent(None, utterance).await
                    }
                }
            }
        };

        info!(next = %next.kind(), tool_invoked, "Step complete");
        session.stage = next;
        session.turns += 1;
        session.last_active = Utc::now();

        StepOutcome {
            session,
            turn: Turn {
                utterance: utterance.to_string(),
                reply,
                tool_invoked,
            },
        }
    }

    async fn on_awaiting_intent(
        &self,
        offered: Option<IntentId>,
        utterance: &str,
    ) -> (Stage, String, bool) {
        if let Some(intent) = self.matcher.find(&self.catalog, utterance) {
            debug!(intent = %intent.id, "Utterance expresses intent");
            return self.ask_confirmation(intent);
        }

        // A "yes" to the clarifying offer expresses the offered intent.
        if let Some(intent) = offered.as_ref().and_then(|id| self.catalog.get(id)) {
            let decision = self
                .classifier
                .classify(utterance, intent, &intent.offer_prompt)
                .await;
            if decision == Decision::Confirmed {
                debug!(intent = %intent.id, "User accepted offered intent");
                return self.ask_confirmation(intent);
            }
        }

        let primary = self.catalog.primary();
        (
            Stage::AwaitingIntent {
                offered: Some(primary.id.clone()),
            },
            primary.offer_prompt.clone(),
            false,
        )
    }

    fn ask_confirmation(&self, intent: &Intent) -> (Stage, String, bool) {
        (
            Stage::AwaitingConfirmation {
                intent: intent.id.clone(),
            },
            intent.confirmation_prompt.clone(),
            false,
        )
    }

    async fn on_awaiting_confirmation(
        &self,
        session_id: &str,
        intent_id: IntentId,
        utterance: &str,
        caller: &Caller,
    ) -> (Stage, String, bool) {
        let Some(intent) = self.catalog.get(&intent_id) else {
            // The catalog changed under a live session; start over.
            warn!(intent = %intent_id, "Pending intent no longer in catalog");
            return self.on_awaiting_intent(None, utterance).await;
        };

        let decision = self
            .classifier
            .classify(utterance, intent, &intent.confirmation_prompt)
            .await;
        if decision == Decision::NotConfirmed {
            return self.ask_confirmation(intent);
        }

        let ctx = ToolContext {
            session_id: session_id.to_string(),
            intent: intent_id.clone(),
            caller: caller.clone(),
        };
        match self.invoke_tool(&ctx).await {
            Ok(result) => {
                let reply = intent.success_reply(&result);
                (
                    Stage::Fulfilled {
                        intent: intent_id,
                        result,
                    },
                    reply,
                    true,
                )
            }
            Err(e) => {
                error!(intent = %intent_id, transient = e.is_transient(), error = %e, "Tool invocation failed");
                (
                    Stage::AwaitingConfirmation { intent: intent_id },
                    intent.failure_message.clone(),
                    true,
                )
            }
        }
    }

    async fn invoke_tool(&self, ctx: &ToolContext) -> Result<crate::session::ToolValue, ToolError> {
        info!(intent = %ctx.intent, user = %ctx.caller.subject, "Invoking tool");
        match tokio::time::timeout(self.tool_timeout, self.tool.invoke(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(self.tool_timeout)),
        }
    }
}
