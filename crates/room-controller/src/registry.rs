//! Connection Registry - the set of live client connections.
//!
//! The registry owns the `ConnectionId -> handle` map and the connection's
//! current room binding. The map lock covers only insert / remove / lookup;
//! actual delivery goes through each connection's bounded mailbox, so a slow
//! peer never stalls the registry or other connections.
//!
//! Removal is the single disconnect gate: the read loop and a write-failure
//! path may both detect the same disconnect, but only the caller that
//! actually removes the entry performs dependent cleanup.

use crate::actors::connection::{ConnectionActorHandle, DeliveryError};
use crate::errors::SignalError;
use crate::observability::metrics;

use signal_protocol::{ConnectionId, ServerMessage};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Per-connection registry entry.
struct ConnectionEntry {
    handle: ConnectionActorHandle,
    room: Option<String>,
}

/// Registry of live connections.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionEntry>>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a registry with a global connection ceiling.
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            max_connections,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, ConnectionEntry>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a newly accepted connection.
    ///
    /// Fails with `CapacityExceeded` when the global ceiling is reached.
    pub fn admit(&self, handle: ConnectionActorHandle) -> Result<(), SignalError> {
        let connection_id = handle.connection_id();
        let mut map = self.lock();

        if map.len() >= self.max_connections {
            metrics::record_admission_rejected();
            return Err(SignalError::CapacityExceeded);
        }

        map.insert(connection_id, ConnectionEntry { handle, room: None });
        metrics::set_open_connections(map.len());
        Ok(())
    }

    /// Remove a connection, returning its handle to the first caller only.
    ///
    /// Both the read loop and a write-failure path may race to remove the
    /// same connection; whoever gets the handle back runs cleanup.
    pub fn remove(&self, connection_id: ConnectionId) -> Option<ConnectionActorHandle> {
        let mut map = self.lock();
        let entry = map.remove(&connection_id);
        metrics::set_open_connections(map.len());
        entry.map(|e| e.handle)
    }

    /// Check whether a connection is live.
    #[must_use]
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.lock().contains_key(&connection_id)
    }

    /// Look up the room a connection is currently in.
    #[must_use]
    pub fn room_of(&self, connection_id: ConnectionId) -> Option<String> {
        self.lock().get(&connection_id).and_then(|e| e.room.clone())
    }

    /// Bind (or clear) a connection's room. Returns false when the
    /// connection is gone.
    pub fn set_room(&self, connection_id: ConnectionId, room: Option<String>) -> bool {
        match self.lock().get_mut(&connection_id) {
            Some(entry) => {
                entry.room = room;
                true
            }
            None => false,
        }
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    /// Deliver a message to one connection.
    ///
    /// A missing or closed connection is an expected race, reported as
    /// `NotFound`. A congested connection drops the frame (logged and
    /// metered) rather than stalling the caller.
    pub fn send(
        &self,
        connection_id: ConnectionId,
        message: ServerMessage,
    ) -> Result<(), SignalError> {
        let handle = self
            .lock()
            .get(&connection_id)
            .map(|e| e.handle.clone())
            .ok_or(SignalError::NotFound)?;

        match handle.try_deliver(message) {
            Ok(()) => Ok(()),
            Err(DeliveryError::Closed) => Err(SignalError::NotFound),
            Err(DeliveryError::Full) => {
                warn!(
                    target: "parley.registry",
                    connection_id = %connection_id,
                    "Dropping frame for congested connection"
                );
                metrics::record_relay_failure("congested");
                Ok(())
            }
        }
    }

    /// Best-effort fan-out to a set of connections.
    ///
    /// Handles are cloned under one short lock, then delivery happens
    /// outside it. A gone peer never aborts delivery to the others.
    /// Returns the number of connections the message was enqueued for.
    pub fn broadcast(
        &self,
        targets: &[ConnectionId],
        message: &ServerMessage,
        excluding: Option<ConnectionId>,
    ) -> usize {
        let handles: Vec<ConnectionActorHandle> = {
            let map = self.lock();
            targets
                .iter()
                .filter(|id| Some(**id) != excluding)
                .filter_map(|id| map.get(id).map(|e| e.handle.clone()))
                .collect()
        };

        let mut delivered = 0;
        for handle in handles {
            match handle.try_deliver(message.clone()) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::Closed) => {
                    debug!(
                        target: "parley.registry",
                        connection_id = %handle.connection_id(),
                        "Skipping broadcast to disconnected peer"
                    );
                    metrics::record_relay_failure("gone");
                }
                Err(DeliveryError::Full) => {
                    warn!(
                        target: "parley.registry",
                        connection_id = %handle.connection_id(),
                        "Dropping broadcast frame for congested connection"
                    );
                    metrics::record_relay_failure("congested");
                }
            }
        }
        delivered
    }
}
