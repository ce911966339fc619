//! In-memory session store with atomic admission.
//!
//! Holds every in-flight and recently finished session keyed by session id.
//! The capacity check and insertion in [`SessionStore::try_admit`] share one
//! write lock, so concurrent admissions cannot both slip under the cap. Only
//! the owning pipeline mutates a session, and writes to terminal sessions are
//! refused.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::AdmissionDenied;
use crate::types::{HealingSession, SessionSnapshot, SessionStatus};

struct SessionEntry {
    session: HealingSession,
    cancel: CancellationToken,
}

/// Shared store of healing sessions.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new session if the active-session cap allows it.
    ///
    /// Returns the session's cancellation token on success.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionDenied::Capacity`] when the number of sessions in a
    /// non-terminal status has reached `max_concurrent`.
    pub async fn try_admit(
        &self,
        session: HealingSession,
        max_concurrent: usize,
    ) -> Result<CancellationToken, AdmissionDenied> {
        let mut inner = self.inner.write().await;

        let active = inner
            .values()
            .filter(|entry| entry.session.status.is_active())
            .count();
        if active >= max_concurrent {
            return Err(AdmissionDenied::Capacity);
        }

        let cancel = CancellationToken::new();
        inner.insert(
            session.session_id.clone(),
            SessionEntry {
                session,
                cancel: cancel.clone(),
            },
        );
        Ok(cancel)
    }

    /// Mutate a live session in place. Returns false for unknown sessions;
    /// writes to terminal sessions are refused.
    pub async fn update<F>(&self, session_id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut HealingSession),
    {
        let mut inner = self.inner.write().await;
        match inner.get_mut(session_id) {
            Some(entry) if !entry.session.status.is_terminal() => {
                mutate(&mut entry.session);
                true
            }
            Some(_) => {
                warn!("Ignoring write to terminal session {session_id}");
                false
            }
            None => false,
        }
    }

    /// Advance a session's status along the legal transition table.
    pub async fn transition(&self, session_id: &str, next: SessionStatus) -> bool {
        self.update(session_id, |session| {
            if session.status.can_transition_to(next) {
                session.status = next;
            } else {
                warn!(
                    "Illegal transition {} -> {next} for session {}",
                    session.status, session.session_id
                );
            }
        })
        .await
    }

    /// Clone the full record of one session.
    pub async fn record(&self, session_id: &str) -> Option<HealingSession> {
        let inner = self.inner.read().await;
        inner.get(session_id).map(|entry| entry.session.clone())
    }

    /// Snapshot one session.
    pub async fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        let inner = self.inner.read().await;
        inner.get(session_id).map(|entry| entry.session.snapshot())
    }

    /// Snapshot every stored session.
    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let inner = self.inner.read().await;
        inner.values().map(|entry| entry.session.snapshot()).collect()
    }

    /// Flag a live session for cancellation. Returns false for unknown or
    /// already-terminal sessions.
    pub async fn cancel(&self, session_id: &str) -> bool {
        let inner = self.inner.read().await;
        match inner.get(session_id) {
            Some(entry) if !entry.session.status.is_terminal() => {
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Remove a session from the store.
    pub async fn remove(&self, session_id: &str) {
        self.inner.write().await.remove(session_id);
    }

    /// Number of sessions currently counting against the concurrency cap.
    pub async fn active_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner
            .values()
            .filter(|entry| entry.session.status.is_active())
            .count()
    }
}
