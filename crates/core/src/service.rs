//! Entry point for transports: `step(session_id, utterance) -> Reply`.

use crate::{
    engine::ConversationEngine,
    session::{StageKind, Turn},
    store::SessionStore,
    tool::Caller,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info, warn};

/// Reply sent while another message for the same session is still in flight.
pub const BUSY_REPLY: &str = "I'm still working on your previous message. Please wait a moment.";

/// Reply used if a step could not complete at all.
pub const INTERNAL_ERROR_REPLY: &str = "Something went wrong. Please try again.";

/// What to do with an utterance that arrives while the same session is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusyPolicy {
    /// Wait for the in-flight step and then process the utterance.
    #[default]
    Queue,
    /// Answer immediately with `BUSY_REPLY` and leave the session untouched.
    Reject,
}

/// Outcome of `ConversationService::step` as seen by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    /// Stage after the step; `None` if the step did not run.
    pub stage: Option<StageKind>,
    pub tool_invoked: bool,
}

#[derive(Clone)]
pub struct ConversationService {
    store: Arc<SessionStore>,
    engine: Arc<ConversationEngine>,
    busy_policy: BusyPolicy,
    /// Live transport connections per session id.
    connections: Arc<Mutex<HashMap<String, usize>>>,
}

impl ConversationService {
    pub fn new(store: Arc<SessionStore>, engine: Arc<ConversationEngine>) -> Self {
        Self {
            store,
            engine,
            busy_policy: BusyPolicy::default(),
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_busy_policy(mut self, busy_policy: BusyPolicy) -> Self {
        self.busy_policy = busy_policy;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Processes one utterance for `session_id` and returns the reply.
    ///
    /// The step runs on its own task while holding the session lock, so if
    /// the caller goes away mid-step the tool call still completes and its
    /// result is stored; only the reply is lost.
    pub async fn step(&self, session_id: &str, utterance: &str, caller: &Caller) -> Reply {
        let guard = match self.busy_policy {
            BusyPolicy::Queue => self.store.lock(session_id).await,
            BusyPolicy::Reject => match self.store.try_lock(session_id).await {
                Some(guard) => guard,
                None => {
                    warn!(%session_id, "Rejecting message for busy session");
                    return Reply {
                        text: BUSY_REPLY.to_string(),
                        stage: None,
                        tool_invoked: false,
                    };
                }
            },
        };

        let engine = self.engine.clone();
        let utterance = utterance.to_string();
        let caller = caller.clone();
        let task = tokio::spawn(async move {
            let mut guard = guard;
            let outcome = engine.step((*guard).clone(), &utterance, &caller).await;
            let stage = outcome.session.stage_kind();
            guard.save(outcome.session);
            (outcome.turn, stage)
        });

        match task.await {
            Ok((Turn { reply, tool_invoked, .. }, stage)) => Reply {
                text: reply,
                stage: Some(stage),
                tool_invoked,
            },
            Err(e) => {
                error!(%session_id, error = ?e, "Conversation step task failed");
                Reply {
                    text: INTERNAL_ERROR_REPLY.to_string(),
                    stage: None,
                    tool_invoked: false,
                }
            }
        }
    }

    /// Drops all state for `session_id` once any in-flight step completes.
    pub async fn close(&self, session_id: &str) -> bool {
        self.store.evict(session_id).await
    }

    /// Registers a transport connection on `session_id` and returns how many
    /// are now attached.
    pub async fn attach(&self, session_id: &str) -> usize {
        let mut connections = self.connections.lock().await;
        let count = connections.entry(session_id.to_string()).or_insert(0);
        *count += 1;
        debug!(%session_id, connections = *count, "Connection attached");
        *count
    }

    /// Unregisters a transport connection from `session_id`.
    ///
    /// When the last connection leaves and `evict` is set, the session is
    /// evicted. Returns whether it was. The connection map stays locked until
    /// the eviction is done, so a connection attaching meanwhile never sees
    /// the old conversation disappear under it.
    pub async fn detach(&self, session_id: &str, evict: bool) -> bool {
        let mut connections = self.connections.lock().await;
        match connections.get_mut(session_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                debug!(%session_id, connections = *count, "Connection detached; session still in use");
                return false;
            }
            Some(_) => {
                connections.remove(session_id);
            }
            None => warn!(%session_id, "Detaching a connection that was never attached"),
        }
        evict && self.store.evict(session_id).await
    }

    /// Periodically evicts sessions idle for longer than `max_idle`.
    pub fn spawn_sweeper(&self, every: Duration, max_idle: Duration) -> JoinHandle<()> {
        let store = self.store.clone();
        info!(?every, ?max_idle, "Starting idle session sweeper");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let removed = store.sweep_idle(max_idle).await;
                debug!(removed, "Sweep finished");
            }
        })
    }
}
