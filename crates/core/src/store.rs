//! Process-wide session storage.
//!
//! The map itself sits behind an `RwLock` that is only held long enough to
//! look up or insert a slot; each slot has its own mutex, so steps for
//! different sessions never contend with each other while a step for one
//! session holds that session's lock for its whole duration.

use crate::session::Session;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    ops::{Deref, DerefMut},
    sync::Arc,
    time::Duration,
};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

#[derive(Debug)]
struct Slot {
    session: Session,
    /// Set once the slot is removed from the map; holders must not use it.
    evicted: bool,
}

type SlotHandle = Arc<Mutex<Slot>>;

#[derive(Debug, Default)]
pub struct SessionStore {
    slots: RwLock<HashMap<String, SlotHandle>>,
}

/// Exclusive access to one session for the duration of a step.
///
/// Mutations made through the guard are visible to the next holder as soon as
/// the guard is dropped.
pub struct SessionGuard {
    guard: OwnedMutexGuard<Slot>,
}

impl SessionGuard {
    /// Replaces the stored session.
    pub fn save(&mut self, session: Session) {
        self.guard.session = session;
    }
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.guard.session
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.guard.session
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, id: &str) -> SlotHandle {
        if let Some(slot) = self.slots.read().await.get(id) {
            return slot.clone();
        }
        let mut slots = self.slots.write().await;
        slots
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(session_id = %id, "Creating session");
                Arc::new(Mutex::new(Slot {
                    session: Session::new(id),
                    evicted: false,
                }))
            })
            .clone()
    }

    /// Locks the session for `id`, creating it on first use.
    ///
    /// Waits for any in-flight step on the same session to finish.
    pub async fn lock(&self, id: &str) -> SessionGuard {
        loop {
            let guard = self.slot(id).await.lock_owned().await;
            if !guard.evicted {
                return SessionGuard { guard };
            }
        }
    }

    /// Like `lock`, but returns `None` instead of waiting on a busy session.
    pub async fn try_lock(&self, id: &str) -> Option<SessionGuard> {
        loop {
            let guard = self.slot(id).await.try_lock_owned().ok()?;
            if !guard.evicted {
                return Some(SessionGuard { guard });
            }
        }
    }

    /// Returns a snapshot of the session for `id`, creating it on first use.
    pub async fn get_or_create(&self, id: &str) -> Session {
        self.lock(id).await.clone()
    }

    /// Replaces the stored session for `id`.
    pub async fn save(&self, id: &str, session: Session) {
        self.lock(id).await.save(session);
    }

    /// Removes the session for `id`, waiting for an in-flight step to finish.
    ///
    /// Returns whether a session was removed.
    pub async fn evict(&self, id: &str) -> bool {
        let Some(slot) = self.slots.read().await.get(id).cloned() else {
            return false;
        };
        let mut guard = slot.lock().await;
        if guard.evicted {
            return false;
        }
        guard.evicted = true;

        let mut slots = self.slots.write().await;
        if slots.get(id).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
            slots.remove(id);
        }
        info!(session_id = %id, "Session evicted");
        true
    }

    /// Evicts every idle session whose last activity is older than `max_idle`.
    ///
    /// Sessions with a step in flight are skipped. Returns how many were removed.
    pub async fn sweep_idle(&self, max_idle: Duration) -> usize {
        self.sweep_idle_at(Utc::now(), max_idle).await
    }

    async fn sweep_idle_at(&self, now: DateTime<Utc>, max_idle: Duration) -> usize {
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::MAX);
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|id, slot| {
            let Ok(mut guard) = slot.try_lock() else {
                return true;
            };
            if now.signed_duration_since(guard.session.last_active) < max_idle {
                return true;
            }
            guard.evicted = true;
            debug!(session_id = %id, "Evicting idle session");
            false
        });
        let removed = before - slots.len();
        if removed > 0 {
            info!(removed, remaining = slots.len(), "Idle sessions swept");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.slots.read().await.contains_key(id)
    }
}
