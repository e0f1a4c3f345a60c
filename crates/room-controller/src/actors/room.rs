//! `RoomActor` - per-room actor that owns room state.
//!
//! Each `RoomActor`:
//! - Owns the ordered participant set for one room (insertion order = join
//!   order) and enforces the capacity limit
//! - Routes negotiation messages between participants (the signaling relay)
//! - Drives the recording state machine for the room
//!
//! Membership mutation and relay for a room serialize through this actor's
//! mailbox, so two racing joins into the last slot resolve to exactly one
//! winner. Rooms never share an actor, so unrelated rooms never contend.
//! Storage side effects run in spawned tasks that report back through the
//! mailbox; the actor itself never waits on the collaborator.

use crate::errors::SignalError;
use crate::observability::metrics;
use crate::recording::Recorder;
use crate::registry::ConnectionRegistry;
use crate::storage::{ArtifactHandle, ArtifactStore, RecordingSummary};

use super::messages::{
    RecordingCommand, RelaySignal, RoomEvent, RoomJoinResult, RoomMessage, RoomState,
};

use signal_protocol::{ConnectionId, RecordingPhase, ServerMessage, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
#[derive(Debug, Clone)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: String,
}

impl RoomActorHandle {
    /// Get the room ID.
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Request to join this room.
    pub async fn join(&self, connection_id: ConnectionId) -> Result<RoomJoinResult, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Join {
                connection_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("room channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("room response receive failed: {e}")))?
    }

    /// Remove a participant. Resolves to `true` when it was a member.
    pub async fn leave(&self, connection_id: ConnectionId) -> Result<bool, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Leave {
                connection_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("room channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("room response receive failed: {e}")))
    }

    /// Relay a negotiation signal. Delivery failures are reported back to
    /// the sender as error frames, not through this result.
    pub async fn relay(
        &self,
        from: ConnectionId,
        signal: RelaySignal,
    ) -> Result<(), SignalError> {
        self.sender
            .send(RoomMessage::Relay { from, signal })
            .await
            .map_err(|e| SignalError::Internal(format!("room channel send failed: {e}")))
    }

    /// Dispatch a recording command.
    pub async fn recording(
        &self,
        from: ConnectionId,
        command: RecordingCommand,
    ) -> Result<(), SignalError> {
        self.sender
            .send(RoomMessage::Recording { from, command })
            .await
            .map_err(|e| SignalError::Internal(format!("room channel send failed: {e}")))
    }

    /// Get current room state.
    pub async fn get_state(&self) -> Result<RoomState, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| SignalError::Internal(format!("room channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("room response receive failed: {e}")))
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    /// Room ID.
    room_id: String,
    /// Session namespace bound to this room's lifetime.
    session_id: SessionId,
    /// Maximum participants.
    capacity: usize,
    /// Message receiver.
    receiver: mpsc::Receiver<RoomMessage>,
    /// Sender for storage tasks to report back into the mailbox.
    self_sender: mpsc::Sender<RoomMessage>,
    /// Cancellation token (child of the supervisor's token).
    cancel_token: CancellationToken,
    /// Participants in join order.
    participants: Vec<ConnectionId>,
    /// Connection registry for message delivery.
    registry: Arc<ConnectionRegistry>,
    /// Storage collaborator for recording artifacts.
    store: Arc<dyn ArtifactStore>,
    /// Recording state machine.
    recorder: Recorder,
    /// Bounded wait for finalization confirmation.
    finalize_timeout: Duration,
    /// Event channel to the supervisor.
    events: mpsc::Sender<RoomEvent>,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        room_id: String,
        session_id: SessionId,
        capacity: usize,
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn ArtifactStore>,
        finalize_timeout: Duration,
        events: mpsc::Sender<RoomEvent>,
        cancel_token: CancellationToken,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room_id: room_id.clone(),
            session_id,
            capacity,
            receiver,
            self_sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            participants: Vec::new(),
            registry,
            store,
            recorder: Recorder::new(room_id.clone(), session_id),
            finalize_timeout,
            events,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "parley.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "parley.actor.room",
            room_id = %self.room_id,
            session_id = %self.session_id,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.shutdown_recording();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => break,
                    }
                }
            }
        }

        info!(
            target: "parley.actor.room",
            room_id = %self.room_id,
            participants = self.participants.len(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message. Room critical sections are short and never
    /// wait on the network or the storage collaborator.
    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                connection_id,
                respond_to,
            } => {
                let result = self.handle_join(connection_id);
                let _ = respond_to.send(result);
            }

            RoomMessage::Leave {
                connection_id,
                respond_to,
            } => {
                let was_member = self.handle_leave(connection_id);
                let _ = respond_to.send(was_member);
            }

            RoomMessage::Relay { from, signal } => {
                self.handle_relay(from, &signal);
            }

            RoomMessage::Recording { from, command } => {
                self.handle_recording(from, command);
            }

            RoomMessage::ArtifactOpened { session_id, result } => {
                self.handle_artifact_opened(session_id, result);
            }

            RoomMessage::RecordingFinalized { session_id, result } => {
                self.handle_recording_finalized(session_id, &result);
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(RoomState {
                    room_id: self.room_id.clone(),
                    session_id: self.session_id,
                    participants: self.participants.clone(),
                    recording_phase: self.recorder.phase(),
                });
            }
        }
    }

    /// Add a participant.
    ///
    /// Re-joining is a no-op that returns the current peer list, so the
    /// participant identity stays unique within the room.
    fn handle_join(&mut self, connection_id: ConnectionId) -> Result<RoomJoinResult, SignalError> {
        if self.participants.contains(&connection_id) {
            let peers = self.peers_except(connection_id);
            return Ok(self.join_result(peers));
        }

        if self.participants.len() >= self.capacity {
            metrics::record_room_full();
            info!(
                target: "parley.actor.room",
                room_id = %self.room_id,
                occupancy = self.participants.len(),
                capacity = self.capacity,
                "Join rejected, room full"
            );
            return Err(SignalError::RoomFull(self.room_id.clone()));
        }

        let peers = self.participants.clone();
        self.participants.push(connection_id);
        metrics::record_join();

        self.registry.broadcast(
            &self.participants,
            &ServerMessage::PeerJoined {
                connection_id,
                participant_count: self.participants.len(),
            },
            Some(connection_id),
        );

        info!(
            target: "parley.actor.room",
            room_id = %self.room_id,
            connection_id = %connection_id,
            occupancy = self.participants.len(),
            capacity = self.capacity,
            "Participant joined"
        );

        Ok(self.join_result(peers))
    }

    fn join_result(&self, peers: Vec<ConnectionId>) -> RoomJoinResult {
        RoomJoinResult {
            room_id: self.room_id.clone(),
            session_id: self.session_id,
            peers,
            capacity: self.capacity,
        }
    }

    fn peers_except(&self, connection_id: ConnectionId) -> Vec<ConnectionId> {
        self.participants
            .iter()
            .copied()
            .filter(|id| *id != connection_id)
            .collect()
    }

    /// Remove a participant. Idempotent: a second leave for the same
    /// connection changes nothing and broadcasts nothing.
    fn handle_leave(&mut self, connection_id: ConnectionId) -> bool {
        let Some(position) = self.participants.iter().position(|id| *id == connection_id)
        else {
            return false;
        };

        self.participants.remove(position);

        self.registry.broadcast(
            &self.participants,
            &ServerMessage::PeerLeft { connection_id },
            None,
        );

        info!(
            target: "parley.actor.room",
            room_id = %self.room_id,
            connection_id = %connection_id,
            remaining = self.participants.len(),
            "Participant left"
        );

        // The recording stops when its initiator or the last participant
        // goes away.
        let should_stop = self.recorder.is_recording()
            && (self.recorder.initiated_by() == Some(connection_id)
                || self.participants.is_empty());
        if should_stop {
            if let Err(e) = self.stop_recording() {
                warn!(
                    target: "parley.actor.room",
                    room_id = %self.room_id,
                    error = %e,
                    "Automatic recording stop failed"
                );
            }
        }

        if self.participants.is_empty() {
            self.report_emptied();
        }

        true
    }

    /// Tell the supervisor this room is empty.
    ///
    /// Never blocks the room mailbox: the supervisor may itself be waiting
    /// on this actor, so a full event channel falls back to a spawned send.
    fn report_emptied(&self) {
        let event = RoomEvent::Emptied {
            room_id: self.room_id.clone(),
            session_id: self.session_id,
        };
        match self.events.try_send(event) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                let events = self.events.clone();
                tokio::spawn(async move {
                    let _ = events.send(event).await;
                });
            }
        }
    }

    /// Route one negotiation signal.
    fn handle_relay(&mut self, from: ConnectionId, signal: &RelaySignal) {
        if !self.participants.contains(&from) {
            debug!(
                target: "parley.actor.room",
                room_id = %self.room_id,
                connection_id = %from,
                "Dropping signal from non-member"
            );
            self.report_error(from, &SignalError::NotFound);
            return;
        }

        match signal {
            RelaySignal::Offer { target, payload } => {
                self.deliver_targeted(
                    from,
                    *target,
                    ServerMessage::Offer {
                        from,
                        payload: payload.clone(),
                    },
                    signal.kind(),
                );
            }
            RelaySignal::Answer { target, payload } => {
                self.deliver_targeted(
                    from,
                    *target,
                    ServerMessage::Answer {
                        from,
                        payload: payload.clone(),
                    },
                    signal.kind(),
                );
            }
            RelaySignal::Candidate {
                target: Some(target),
                payload,
            } => {
                self.deliver_targeted(
                    from,
                    *target,
                    ServerMessage::Candidate {
                        from,
                        payload: payload.clone(),
                    },
                    signal.kind(),
                );
            }
            RelaySignal::Candidate {
                target: None,
                payload,
            } => {
                self.registry.broadcast(
                    &self.participants,
                    &ServerMessage::Candidate {
                        from,
                        payload: payload.clone(),
                    },
                    Some(from),
                );
                metrics::record_relay(signal.kind());
            }
        }
    }

    /// Forward a targeted signal, reporting failures back to the sender.
    fn deliver_targeted(
        &self,
        from: ConnectionId,
        target: ConnectionId,
        message: ServerMessage,
        kind: &'static str,
    ) {
        if !self.participants.contains(&target) {
            metrics::record_relay_failure("unknown_target");
            self.report_error(from, &SignalError::UnknownTarget);
            return;
        }

        match self.registry.send(target, message) {
            Ok(()) => metrics::record_relay(kind),
            Err(e) => {
                // Target is mid-disconnect; expected race, reported to the
                // sender so it can retry after the peer reconnects.
                metrics::record_relay_failure("gone");
                debug!(
                    target: "parley.actor.room",
                    room_id = %self.room_id,
                    from = %from,
                    to = %target,
                    kind,
                    "Relay target gone"
                );
                self.report_error(from, &e);
            }
        }
    }

    /// Handle a recording command from a participant.
    fn handle_recording(&mut self, from: ConnectionId, command: RecordingCommand) {
        if !self.participants.contains(&from) {
            self.report_error(from, &SignalError::NotFound);
            return;
        }

        let result = match command {
            RecordingCommand::Start => self.start_recording(from),
            RecordingCommand::Stop => self.stop_recording(),
        };

        if let Err(e) = result {
            debug!(
                target: "parley.actor.room",
                room_id = %self.room_id,
                connection_id = %from,
                command = command.as_str(),
                error = %e,
                "Recording command rejected"
            );
            self.report_error(from, &e);
        }
    }

    /// `Idle -> Recording`: open the artifact in the background and notify
    /// the room.
    fn start_recording(&mut self, initiated_by: ConnectionId) -> Result<(), SignalError> {
        let session = self.recorder.start(initiated_by)?;
        metrics::record_recording_transition("recording");

        info!(
            target: "parley.actor.room",
            room_id = %self.room_id,
            session_id = %session.session_id,
            initiated_by = %initiated_by,
            "Recording started"
        );

        let _ = self.registry.send(
            initiated_by,
            ServerMessage::RecordingStarted {
                session_id: session.session_id,
            },
        );
        self.registry.broadcast(
            &self.participants,
            &ServerMessage::RecordingStatus {
                phase: RecordingPhase::Recording,
                session_id: session.session_id,
                duration_seconds: None,
            },
            None,
        );

        let store = Arc::clone(&self.store);
        let report = self.self_sender.clone();
        let session_id = session.session_id;
        tokio::spawn(async move {
            let result = store.open_artifact(session_id).await;
            let _ = report
                .send(RoomMessage::ArtifactOpened { session_id, result })
                .await;
        });

        Ok(())
    }

    /// `Recording -> Finalizing`: notify the room and finalize the artifact
    /// in the background under the bounded confirmation timeout.
    fn stop_recording(&mut self) -> Result<(), SignalError> {
        let (summary, artifact) = self.recorder.stop()?;
        metrics::record_recording_transition("finalizing");

        info!(
            target: "parley.actor.room",
            room_id = %self.room_id,
            session_id = %summary.session_id,
            duration_seconds = summary.duration_seconds,
            "Recording stopping"
        );

        self.registry.broadcast(
            &self.participants,
            &ServerMessage::RecordingStatus {
                phase: RecordingPhase::Finalizing,
                session_id: summary.session_id,
                duration_seconds: Some(summary.duration_seconds),
            },
            None,
        );

        self.spawn_finalizer(summary, artifact);
        Ok(())
    }

    fn spawn_finalizer(&self, summary: RecordingSummary, artifact: Option<ArtifactHandle>) {
        let store = Arc::clone(&self.store);
        let report = self.self_sender.clone();
        let timeout = self.finalize_timeout;
        let session_id = summary.session_id;

        tokio::spawn(async move {
            let result =
                match tokio::time::timeout(timeout, store.finalize_artifact(artifact, &summary))
                    .await
                {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(SignalError::StorageFault(
                        "finalize confirmation timed out".to_string(),
                    )),
                };
            let _ = report
                .send(RoomMessage::RecordingFinalized { session_id, result })
                .await;
        });
    }

    /// The storage open completed; attach the handle or surface the fault.
    fn handle_artifact_opened(
        &mut self,
        session_id: SessionId,
        result: Result<ArtifactHandle, SignalError>,
    ) {
        match result {
            Ok(handle) => {
                if self.recorder.attach_artifact(handle).is_some() {
                    // Recording stopped before the open completed; the
                    // finalizer already persisted the outcome by path.
                    debug!(
                        target: "parley.actor.room",
                        room_id = %self.room_id,
                        session_id = %session_id,
                        "Artifact opened after recording stopped"
                    );
                }
            }
            Err(e) => {
                warn!(
                    target: "parley.actor.room",
                    room_id = %self.room_id,
                    session_id = %session_id,
                    error = %e,
                    "Artifact open failed, stopping recording"
                );
                if let Some(initiator) = self.recorder.initiated_by() {
                    self.report_error(initiator, &SignalError::StorageFault(String::new()));
                }
                if self.recorder.is_recording() {
                    let _ = self.stop_recording();
                }
            }
        }
    }

    /// Finalization confirmed (or timed out): `Finalizing -> Idle`.
    fn handle_recording_finalized(
        &mut self,
        session_id: SessionId,
        result: &Result<(), SignalError>,
    ) {
        if let Err(e) = result {
            // Forced reset; the artifact may be incomplete.
            warn!(
                target: "parley.actor.room",
                room_id = %self.room_id,
                session_id = %session_id,
                error = %e,
                "Recording finalization failed, forcing state to idle"
            );
        }

        if self.recorder.finalized() {
            metrics::record_recording_transition("idle");
            self.registry.broadcast(
                &self.participants,
                &ServerMessage::RecordingStatus {
                    phase: RecordingPhase::Idle,
                    session_id,
                    duration_seconds: None,
                },
                None,
            );
        }
    }

    /// Send an error frame to one participant, best-effort.
    fn report_error(&self, connection_id: ConnectionId, error: &SignalError) {
        let _ = self.registry.send(
            connection_id,
            ServerMessage::Error {
                code: error.error_code(),
                message: error.client_message(),
            },
        );
    }

    /// Flush any in-flight recording on shutdown.
    fn shutdown_recording(&mut self) {
        if self.recorder.is_recording() {
            if let Ok((summary, artifact)) = self.recorder.stop() {
                self.spawn_finalizer(summary, artifact);
            }
        }
    }
}
