//! Session lifecycle manager.
//!
//! A session is the storage namespace a room's uploads and recordings share.
//! It is allocated when the room comes alive (first join) and released when
//! the room is destroyed, so one room activation maps to exactly one
//! namespace. Release never deletes files; it only tells the storage
//! collaborator the namespace is no longer actively written.

use crate::errors::SignalError;
use crate::storage::ArtifactStore;

use signal_protocol::SessionId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// Allocates and releases session namespaces.
pub struct SessionManager {
    store: Arc<dyn ArtifactStore>,
    active: Mutex<HashSet<SessionId>>,
}

impl SessionManager {
    /// Create a manager backed by the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            active: Mutex::new(HashSet::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<SessionId>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a collision-resistant session identity and materialize its
    /// namespace. Called once per room activation.
    pub async fn allocate(&self, room_id: &str) -> Result<SessionId, SignalError> {
        let session_id = SessionId::new();
        self.store.ensure_namespace(session_id).await?;
        self.lock().insert(session_id);

        info!(
            target: "parley.session",
            room_id = %room_id,
            session_id = %session_id,
            "Session allocated"
        );
        Ok(session_id)
    }

    /// Release a session when its owning room is destroyed.
    ///
    /// Idempotent; a storage fault here is logged, not propagated, because
    /// the room teardown must complete regardless.
    pub async fn release(&self, session_id: SessionId) {
        let was_active = self.lock().remove(&session_id);
        if !was_active {
            warn!(
                target: "parley.session",
                session_id = %session_id,
                "Releasing unknown session"
            );
        }

        if let Err(e) = self.store.release_namespace(session_id).await {
            warn!(
                target: "parley.session",
                session_id = %session_id,
                error = %e,
                "Storage collaborator failed to release namespace"
            );
        }

        info!(
            target: "parley.session",
            session_id = %session_id,
            "Session released"
        );
    }

    /// Check whether a session is currently active.
    #[must_use]
    pub fn is_active(&self, session_id: SessionId) -> bool {
        self.lock().contains(&session_id)
    }

    /// Number of active sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }
}
