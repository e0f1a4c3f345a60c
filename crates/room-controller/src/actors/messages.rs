//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Request-reply patterns use `tokio::sync::oneshot`.

use crate::errors::SignalError;
use crate::storage::ArtifactHandle;

use serde_json::Value;
use signal_protocol::{ConnectionId, RecordingPhase, ServerMessage, SessionId};
use std::time::Duration;
use tokio::sync::oneshot;

use super::room::RoomActorHandle;

/// Messages sent to the `RoomSupervisorActor`.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// A connection wants to join a room (created lazily on first join).
    JoinRoom {
        connection_id: ConnectionId,
        room_id: String,
        respond_to: oneshot::Sender<Result<JoinOutcome, SignalError>>,
    },

    /// A connection leaves its current room. Idempotent: resolves to
    /// `Ok(None)` when the connection is not in any room.
    LeaveRoom {
        connection_id: ConnectionId,
        /// Departure label for metrics: `leave`, `disconnect` or `switch`.
        reason: &'static str,
        respond_to: oneshot::Sender<Result<Option<String>, SignalError>>,
    },

    /// Get current supervisor status (for health and stats).
    GetStatus {
        respond_to: oneshot::Sender<SupervisorStatus>,
    },

    /// Initiate graceful shutdown.
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), SignalError>>,
    },
}

/// Messages sent to a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Add a connection as a participant.
    Join {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Result<RoomJoinResult, SignalError>>,
    },

    /// Remove a participant. Resolves to `true` when the connection was a
    /// member; repeated leaves are no-ops.
    Leave {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Relay a negotiation signal from a participant.
    Relay {
        from: ConnectionId,
        signal: RelaySignal,
    },

    /// Recording command from a participant.
    Recording {
        from: ConnectionId,
        command: RecordingCommand,
    },

    /// The storage collaborator opened (or failed to open) the artifact for
    /// the active recording.
    ArtifactOpened {
        session_id: SessionId,
        result: Result<ArtifactHandle, SignalError>,
    },

    /// The finalizer task completed (or timed out / failed).
    RecordingFinalized {
        session_id: SessionId,
        result: Result<(), SignalError>,
    },

    /// Get current room state (for debugging and tests).
    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

/// Messages sent to a `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Serialize and write a frame to the client.
    Deliver(ServerMessage),

    /// Close the connection gracefully.
    Close { reason: String },
}

/// A negotiation signal to be routed by a room.
///
/// Payloads are opaque; the relay forwards them verbatim.
#[derive(Debug, Clone)]
pub enum RelaySignal {
    /// Session description offer for one peer.
    Offer {
        target: ConnectionId,
        payload: Value,
    },
    /// Session description answer for one peer.
    Answer {
        target: ConnectionId,
        payload: Value,
    },
    /// Connectivity candidate; broadcast to the room when untargeted.
    Candidate {
        target: Option<ConnectionId>,
        payload: Value,
    },
}

impl RelaySignal {
    /// Signal kind for logs and metrics labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            RelaySignal::Offer { .. } => "offer",
            RelaySignal::Answer { .. } => "answer",
            RelaySignal::Candidate { .. } => "candidate",
        }
    }
}

/// Recording commands dispatched by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingCommand {
    Start,
    Stop,
}

impl RecordingCommand {
    /// Command name for logs and metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RecordingCommand::Start => "start",
            RecordingCommand::Stop => "stop",
        }
    }
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Result of a successful supervisor-level join.
#[derive(Debug)]
pub struct JoinOutcome {
    /// Handle to the joined room, for direct relay dispatch.
    pub room: RoomActorHandle,
    /// Membership details for the join confirmation frame.
    pub joined: RoomJoinResult,
}

/// Result of a successful room-level join.
#[derive(Debug, Clone)]
pub struct RoomJoinResult {
    /// Room identifier.
    pub room_id: String,
    /// Session namespace shared by the room's uploads and recordings.
    pub session_id: SessionId,
    /// Participants that were already in the room, in join order.
    pub peers: Vec<ConnectionId>,
    /// Room capacity.
    pub capacity: usize,
}

/// Status of the `RoomSupervisorActor`.
#[derive(Debug, Clone)]
pub struct SupervisorStatus {
    /// Number of live rooms.
    pub room_count: usize,
    /// Whether the supervisor is draining (graceful shutdown).
    pub is_draining: bool,
}

/// Current state of a room (for debugging and tests).
#[derive(Debug, Clone)]
pub struct RoomState {
    /// Room identifier.
    pub room_id: String,
    /// Session namespace identifier.
    pub session_id: SessionId,
    /// Current participants, in join order.
    pub participants: Vec<ConnectionId>,
    /// Current recording phase.
    pub recording_phase: RecordingPhase,
}

/// Events reported by room actors to the supervisor.
#[derive(Debug)]
pub enum RoomEvent {
    /// The last participant left; the room should be destroyed.
    Emptied {
        room_id: String,
        session_id: SessionId,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_signal_kinds() {
        let offer = RelaySignal::Offer {
            target: ConnectionId::new(),
            payload: Value::Null,
        };
        assert_eq!(offer.kind(), "offer");

        let candidate = RelaySignal::Candidate {
            target: None,
            payload: Value::Null,
        };
        assert_eq!(candidate.kind(), "candidate");
    }

    #[test]
    fn test_recording_command_names() {
        assert_eq!(RecordingCommand::Start.as_str(), "start");
        assert_eq!(RecordingCommand::Stop.as_str(), "stop");
    }
}
