//! Wire protocol for the Parley signaling server.
//!
//! Clients exchange JSON text frames with the server. Every frame is a
//! structured record with a `type` tag; negotiation bodies (SDP offers,
//! answers, ICE candidates) are opaque JSON values that the server relays
//! verbatim and never inspects.
//!
//! The message sets are closed enums so that adding a message kind forces
//! every dispatch site to be updated at compile time.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Identity of one live client connection.
///
/// Allocated by the server on accept and echoed back to the client in
/// [`ServerMessage::Welcome`]. Peers address each other by this identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh connection identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a room's storage session namespace.
///
/// Uploaded files and recording artifacts for one room activation share
/// this identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Allocate a fresh, collision-resistant session identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Messages sent by clients to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room, creating it if it does not exist yet.
    Join { room_id: String },

    /// Leave the current room. No-op when not in a room.
    Leave,

    /// Session description offer for one specific peer.
    Offer { target: ConnectionId, payload: Value },

    /// Session description answer for one specific peer.
    Answer { target: ConnectionId, payload: Value },

    /// Connectivity candidate; targeted at one peer, or announced to the
    /// whole room when `target` is absent.
    Candidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ConnectionId>,
        payload: Value,
    },

    /// Start recording the current room.
    StartRecording,

    /// Stop the active recording of the current room.
    StopRecording,
}

/// Messages sent by the server to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame after accept; tells the client its own identity.
    Welcome { connection_id: ConnectionId },

    /// Join confirmation. `peers` lists the participants that were already
    /// in the room, in join order, for the new joiner to negotiate with.
    RoomJoined {
        room_id: String,
        connection_id: ConnectionId,
        session_id: SessionId,
        peers: Vec<ConnectionId>,
        capacity: usize,
    },

    /// Leave confirmation for an explicit leave request.
    RoomLeft { room_id: String },

    /// Another participant joined the room.
    PeerJoined {
        connection_id: ConnectionId,
        participant_count: usize,
    },

    /// A participant left the room (or disconnected).
    PeerLeft { connection_id: ConnectionId },

    /// Relayed session description offer.
    Offer { from: ConnectionId, payload: Value },

    /// Relayed session description answer.
    Answer { from: ConnectionId, payload: Value },

    /// Relayed connectivity candidate.
    Candidate { from: ConnectionId, payload: Value },

    /// Recording start confirmation, sent to the initiator.
    RecordingStarted { session_id: SessionId },

    /// Recording phase change, broadcast to the whole room.
    RecordingStatus {
        phase: RecordingPhase,
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_seconds: Option<f64>,
    },

    /// A request failed; `code` tells the client how to react.
    Error { code: ErrorCode, message: String },
}

/// Phase of a room's recording state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingPhase {
    Idle,
    Recording,
    Finalizing,
}

impl fmt::Display for RecordingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordingPhase::Idle => "idle",
            RecordingPhase::Recording => "recording",
            RecordingPhase::Finalizing => "finalizing",
        })
    }
}

/// Machine-readable failure codes carried by [`ServerMessage::Error`].
///
/// A `RoomFull` rejection is retryable (pick another room); an
/// `UnknownTarget` means the peer is gone and negotiation with it should
/// be abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The room is at capacity.
    RoomFull,
    /// The addressed peer is not in the sender's room.
    UnknownTarget,
    /// The addressed connection no longer exists.
    NotFound,
    /// A recording is already in progress for this room.
    AlreadyRecording,
    /// The recording command is not valid in the current phase.
    Busy,
    /// The storage collaborator failed; signaling is unaffected.
    StorageFault,
    /// The server's global connection ceiling was reached.
    CapacityExceeded,
    /// The request requires room membership first.
    NotInRoom,
    /// The frame could not be parsed as a protocol message.
    BadMessage,
    /// Unexpected server-side failure.
    Internal,
}

impl ErrorCode {
    /// Stable string form used in metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RoomFull => "room_full",
            ErrorCode::UnknownTarget => "unknown_target",
            ErrorCode::NotFound => "not_found",
            ErrorCode::AlreadyRecording => "already_recording",
            ErrorCode::Busy => "busy",
            ErrorCode::StorageFault => "storage_fault",
            ErrorCode::CapacityExceeded => "capacity_exceeded",
            ErrorCode::NotInRoom => "not_in_room",
            ErrorCode::BadMessage => "bad_message",
            ErrorCode::Internal => "internal",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_wire_format_is_stable() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"join","room_id":"alpha"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Join { room_id } if room_id == "alpha"));
    }

    #[test]
    fn test_candidate_target_is_optional() {
        let broadcast: ClientMessage =
            serde_json::from_str(r#"{"type":"candidate","payload":{"candidate":"..."}}"#).unwrap();
        assert!(matches!(
            broadcast,
            ClientMessage::Candidate { target: None, .. }
        ));

        let id = ConnectionId::new();
        let targeted = serde_json::to_value(ClientMessage::Candidate {
            target: Some(id),
            payload: json!({"candidate": "..."}),
        })
        .unwrap();
        assert_eq!(targeted["target"], json!(id.to_string()));
    }

    #[test]
    fn test_relay_payload_passes_through_unchanged() {
        let payload = json!({"sdp": "v=0...", "nested": {"k": [1, 2, 3]}});
        let wire = serde_json::to_string(&ServerMessage::Offer {
            from: ConnectionId::new(),
            payload: payload.clone(),
        })
        .unwrap();

        let parsed: ServerMessage = serde_json::from_str(&wire).unwrap();
        match parsed {
            ServerMessage::Offer { payload: relayed, .. } => assert_eq!(relayed, payload),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_error_frame_carries_snake_case_code() {
        let wire = serde_json::to_value(ServerMessage::Error {
            code: ErrorCode::RoomFull,
            message: "room alpha is full".to_string(),
        })
        .unwrap();
        assert_eq!(wire["type"], "error");
        assert_eq!(wire["code"], "room_full");
    }

    #[test]
    fn test_recording_status_omits_absent_duration() {
        let wire = serde_json::to_value(ServerMessage::RecordingStatus {
            phase: RecordingPhase::Recording,
            session_id: SessionId::new(),
            duration_seconds: None,
        })
        .unwrap();
        assert_eq!(wire["phase"], "recording");
        assert!(wire.get("duration_seconds").is_none());
    }
}
