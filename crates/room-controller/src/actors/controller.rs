//! `RoomSupervisorActor` - singleton supervisor for room actors.
//!
//! The supervisor is the top-level actor:
//!
//! - Owns the `RoomId -> RoomActor` directory
//! - Creates rooms lazily on first join, allocating the session namespace
//! - Destroys rooms when they report themselves empty, releasing the
//!   namespace
//! - Owns the root `CancellationToken` for graceful shutdown
//!
//! Join and leave requests pass through the supervisor so that the
//! connection's room binding, the room directory, and the session
//! lifecycle stay consistent; relay traffic goes directly to room actors
//! and never contends here.

use crate::errors::SignalError;
use crate::observability::metrics;
use crate::registry::ConnectionRegistry;
use crate::session::SessionManager;
use crate::storage::ArtifactStore;

use super::messages::{JoinOutcome, RoomEvent, SupervisorMessage, SupervisorStatus};
use super::room::{RoomActor, RoomActorHandle};

use signal_protocol::{ConnectionId, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the supervisor mailbox.
const SUPERVISOR_CHANNEL_BUFFER: usize = 1000;

/// Buffer for room-to-supervisor events.
const ROOM_EVENT_BUFFER: usize = 256;

/// Handle to the `RoomSupervisorActor`.
///
/// This is the public interface for interacting with the supervisor. All
/// methods are async and return results via oneshot channels.
#[derive(Clone)]
pub struct RoomSupervisorHandle {
    sender: mpsc::Sender<SupervisorMessage>,
    cancel_token: CancellationToken,
}

impl RoomSupervisorHandle {
    /// Create a new `RoomSupervisorActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(
        server_id: String,
        room_capacity: usize,
        finalize_timeout: Duration,
        registry: Arc<ConnectionRegistry>,
        sessions: Arc<SessionManager>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(SUPERVISOR_CHANNEL_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(ROOM_EVENT_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomSupervisor {
            server_id,
            receiver,
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            room_events_rx: events_rx,
            room_events_tx: events_tx,
            registry,
            sessions,
            store,
            room_capacity,
            finalize_timeout,
            accepting_new: true,
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Join a room, creating it on first join.
    pub async fn join_room(
        &self,
        connection_id: ConnectionId,
        room_id: String,
    ) -> Result<JoinOutcome, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SupervisorMessage::JoinRoom {
                connection_id,
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("supervisor channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("supervisor response failed: {e}")))?
    }

    /// Leave the current room, if any. Idempotent.
    ///
    /// `reason` labels the departure for metrics: `leave`, `disconnect` or
    /// `switch`.
    pub async fn leave(
        &self,
        connection_id: ConnectionId,
        reason: &'static str,
    ) -> Result<Option<String>, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SupervisorMessage::LeaveRoom {
                connection_id,
                reason,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("supervisor channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("supervisor response failed: {e}")))?
    }

    /// Get the current supervisor status.
    pub async fn get_status(&self) -> Result<SupervisorStatus, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SupervisorMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| SignalError::Internal(format!("supervisor channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("supervisor response failed: {e}")))
    }

    /// Initiate graceful shutdown.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SupervisorMessage::Shutdown {
                deadline,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("supervisor channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("supervisor response failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for dependent tasks (connections, servers).
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    /// Handle to the room actor.
    handle: RoomActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
    /// Session namespace bound to the room.
    session_id: SessionId,
}

/// The `RoomSupervisorActor` implementation.
struct RoomSupervisor {
    /// Server instance ID.
    server_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<SupervisorMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    /// Managed rooms by ID.
    rooms: HashMap<String, ManagedRoom>,
    /// Events reported by room actors.
    room_events_rx: mpsc::Receiver<RoomEvent>,
    /// Event sender cloned into every spawned room.
    room_events_tx: mpsc::Sender<RoomEvent>,
    /// Connection registry (membership validation and delivery).
    registry: Arc<ConnectionRegistry>,
    /// Session lifecycle manager.
    sessions: Arc<SessionManager>,
    /// Storage collaborator, passed to rooms for recording artifacts.
    store: Arc<dyn ArtifactStore>,
    /// Per-room participant capacity.
    room_capacity: usize,
    /// Bounded wait for recording finalization.
    finalize_timeout: Duration,
    /// Whether new joins are accepted.
    accepting_new: bool,
}

impl RoomSupervisor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "parley.actor.supervisor", fields(server_id = %self.server_id))]
    async fn run(mut self) {
        info!(
            target: "parley.actor.supervisor",
            server_id = %self.server_id,
            "RoomSupervisorActor started"
        );

        loop {
            self.reap_finished_rooms().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.graceful_shutdown().await;
                    break;
                }

                event = self.room_events_rx.recv() => {
                    if let Some(event) = event {
                        self.handle_room_event(event).await;
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => break,
                    }
                }
            }
        }

        info!(
            target: "parley.actor.supervisor",
            server_id = %self.server_id,
            rooms_remaining = self.rooms.len(),
            "RoomSupervisorActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: SupervisorMessage) {
        match message {
            SupervisorMessage::JoinRoom {
                connection_id,
                room_id,
                respond_to,
            } => {
                let result = self.handle_join(connection_id, room_id).await;
                let _ = respond_to.send(result);
            }

            SupervisorMessage::LeaveRoom {
                connection_id,
                reason,
                respond_to,
            } => {
                let result = self.handle_leave(connection_id, reason).await;
                let _ = respond_to.send(result);
            }

            SupervisorMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(SupervisorStatus {
                    room_count: self.rooms.len(),
                    is_draining: !self.accepting_new,
                });
            }

            SupervisorMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                let result = self.initiate_shutdown(deadline).await;
                let _ = respond_to.send(result);
            }
        }
    }

    /// Join a connection into a room, creating the room on first join.
    async fn handle_join(
        &mut self,
        connection_id: ConnectionId,
        room_id: String,
    ) -> Result<JoinOutcome, SignalError> {
        if !self.accepting_new {
            return Err(SignalError::CapacityExceeded);
        }

        // Membership requires a live connection.
        if !self.registry.contains(connection_id) {
            return Err(SignalError::NotFound);
        }

        match self.registry.room_of(connection_id) {
            // Re-join of the current room is idempotent at the room actor.
            Some(current) if current == room_id => {}
            // Joining a different room leaves the old one first.
            Some(current) => {
                debug!(
                    target: "parley.actor.supervisor",
                    connection_id = %connection_id,
                    from_room = %current,
                    to_room = %room_id,
                    "Connection switching rooms"
                );
                self.leave_room_member(connection_id, &current, "switch").await;
            }
            None => {}
        }

        let handle = self.room_handle_or_create(&room_id).await?;
        let joined = handle.join(connection_id).await?;
        self.registry.set_room(connection_id, Some(room_id));

        Ok(JoinOutcome {
            room: handle,
            joined,
        })
    }

    /// Get the live room actor for `room_id`, spawning it (and allocating
    /// its session namespace) when absent.
    async fn room_handle_or_create(
        &mut self,
        room_id: &str,
    ) -> Result<RoomActorHandle, SignalError> {
        if let Some(managed) = self.rooms.get(room_id) {
            return Ok(managed.handle.clone());
        }

        let session_id = self.sessions.allocate(room_id).await?;

        let (handle, task_handle) = RoomActor::spawn(
            room_id.to_string(),
            session_id,
            self.room_capacity,
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
            self.finalize_timeout,
            self.room_events_tx.clone(),
            self.cancel_token.child_token(),
        );

        self.rooms.insert(
            room_id.to_string(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
                session_id,
            },
        );
        metrics::set_active_rooms(self.rooms.len());

        info!(
            target: "parley.actor.supervisor",
            room_id = %room_id,
            session_id = %session_id,
            "Room created"
        );

        Ok(handle)
    }

    /// Leave the connection's current room. Idempotent.
    async fn handle_leave(
        &mut self,
        connection_id: ConnectionId,
        reason: &'static str,
    ) -> Result<Option<String>, SignalError> {
        let Some(room_id) = self.registry.room_of(connection_id) else {
            return Ok(None);
        };

        let was_member = self.leave_room_member(connection_id, &room_id, reason).await;
        Ok(was_member.then_some(room_id))
    }

    /// Remove a connection from one room and clear its binding.
    async fn leave_room_member(
        &mut self,
        connection_id: ConnectionId,
        room_id: &str,
        reason: &'static str,
    ) -> bool {
        self.registry.set_room(connection_id, None);

        let Some(managed) = self.rooms.get(room_id) else {
            return false;
        };

        match managed.handle.leave(connection_id).await {
            Ok(true) => {
                metrics::record_leave(reason);
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(
                    target: "parley.actor.supervisor",
                    room_id = %room_id,
                    connection_id = %connection_id,
                    error = %e,
                    "Leave failed, room actor unreachable"
                );
                false
            }
        }
    }

    /// Handle an event reported by a room actor.
    async fn handle_room_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Emptied {
                room_id,
                session_id,
            } => {
                let Some(managed) = self.rooms.remove(&room_id) else {
                    return;
                };

                // A join may have raced in after the room reported empty;
                // in that case the room stays alive.
                if let Ok(state) = managed.handle.get_state().await {
                    if !state.participants.is_empty() {
                        self.rooms.insert(room_id, managed);
                        return;
                    }
                }

                managed.handle.cancel();
                let _ =
                    tokio::time::timeout(Duration::from_secs(5), managed.task_handle).await;

                self.sessions.release(session_id).await;
                metrics::set_active_rooms(self.rooms.len());

                info!(
                    target: "parley.actor.supervisor",
                    room_id = %room_id,
                    session_id = %session_id,
                    "Room destroyed"
                );
            }
        }
    }

    /// Reap room actors whose tasks have terminated unexpectedly.
    async fn reap_finished_rooms(&mut self) {
        let finished: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            if let Some(managed) = self.rooms.remove(&room_id) {
                match managed.task_handle.await {
                    Ok(()) => {
                        debug!(
                            target: "parley.actor.supervisor",
                            room_id = %room_id,
                            "Room actor exited"
                        );
                    }
                    Err(join_error) if join_error.is_panic() => {
                        error!(
                            target: "parley.actor.supervisor",
                            room_id = %room_id,
                            error = ?join_error,
                            "Room actor panicked"
                        );
                    }
                    Err(join_error) => {
                        debug!(
                            target: "parley.actor.supervisor",
                            room_id = %room_id,
                            error = ?join_error,
                            "Room actor cancelled"
                        );
                    }
                }

                self.sessions.release(managed.session_id).await;
                metrics::set_active_rooms(self.rooms.len());
            }
        }
    }

    /// Initiate graceful shutdown: stop accepting joins, then drain rooms.
    async fn initiate_shutdown(&mut self, deadline: Duration) -> Result<(), SignalError> {
        info!(
            target: "parley.actor.supervisor",
            server_id = %self.server_id,
            rooms = self.rooms.len(),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        let drain_deadline = tokio::time::Instant::now() + deadline;
        for (room_id, managed) in self.rooms.drain() {
            if tokio::time::timeout_at(drain_deadline, managed.task_handle)
                .await
                .is_err()
            {
                warn!(
                    target: "parley.actor.supervisor",
                    room_id = %room_id,
                    "Room shutdown timed out"
                );
            }
            self.sessions.release(managed.session_id).await;
        }
        metrics::set_active_rooms(0);

        self.cancel_token.cancel();
        Ok(())
    }

    /// Perform shutdown triggered by cancellation.
    async fn graceful_shutdown(&mut self) {
        self.accepting_new = false;

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (room_id, managed) in self.rooms.drain() {
            if tokio::time::timeout(Duration::from_secs(5), managed.task_handle)
                .await
                .is_err()
            {
                warn!(
                    target: "parley.actor.supervisor",
                    room_id = %room_id,
                    "Room shutdown timed out"
                );
            }
            self.sessions.release(managed.session_id).await;
        }

        info!(
            target: "parley.actor.supervisor",
            server_id = %self.server_id,
            "Graceful shutdown complete"
        );
    }
}
