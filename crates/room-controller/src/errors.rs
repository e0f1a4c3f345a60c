//! Room Controller error types.
//!
//! Every per-message failure maps to a wire [`ErrorCode`] and a client-safe
//! message; internal details stay in the server logs. Per-message errors are
//! local: they are reported back to the originating connection and never
//! terminate the relay or other sessions.

use signal_protocol::ErrorCode;
use thiserror::Error;

/// Room Controller error type.
#[derive(Debug, Error)]
pub enum SignalError {
    /// The room is at its participant capacity.
    #[error("room is full: {0}")]
    RoomFull(String),

    /// The addressed peer is not a member of the sender's room.
    #[error("target is not in this room")]
    UnknownTarget,

    /// The connection no longer exists (already disconnected).
    ///
    /// Expected during disconnect races; handled, logged, never fatal.
    #[error("connection not found")]
    NotFound,

    /// A recording is already in progress for the room.
    #[error("recording already in progress")]
    AlreadyRecording,

    /// Recording command arrived in a phase that cannot accept it.
    #[error("recording is busy in phase {0}")]
    Busy(String),

    /// The storage collaborator failed.
    #[error("storage fault: {0}")]
    StorageFault(String),

    /// The global connection ceiling was reached.
    #[error("connection capacity exceeded")]
    CapacityExceeded,

    /// Negotiation or recording requested before joining a room.
    #[error("not in a room")]
    NotInRoom,

    /// An inbound frame could not be parsed as a protocol message.
    #[error("malformed message: {0}")]
    BadMessage(String),

    /// Internal failure (actor channel closed, task lost).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SignalError {
    /// Returns the wire `ErrorCode` for this error.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            SignalError::RoomFull(_) => ErrorCode::RoomFull,
            SignalError::UnknownTarget => ErrorCode::UnknownTarget,
            SignalError::NotFound => ErrorCode::NotFound,
            SignalError::AlreadyRecording => ErrorCode::AlreadyRecording,
            SignalError::Busy(_) => ErrorCode::Busy,
            SignalError::StorageFault(_) => ErrorCode::StorageFault,
            SignalError::CapacityExceeded => ErrorCode::CapacityExceeded,
            SignalError::NotInRoom => ErrorCode::NotInRoom,
            SignalError::BadMessage(_) => ErrorCode::BadMessage,
            SignalError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SignalError::RoomFull(room_id) => format!("Room {room_id} is full"),
            SignalError::UnknownTarget => "Target peer is not in your room".to_string(),
            SignalError::NotFound => "Peer is no longer connected".to_string(),
            SignalError::AlreadyRecording => "Recording is already in progress".to_string(),
            SignalError::Busy(_) => "Recording is busy, try again shortly".to_string(),
            SignalError::StorageFault(_) => "Recording storage is unavailable".to_string(),
            SignalError::CapacityExceeded => "Server is at capacity, please retry".to_string(),
            SignalError::NotInRoom => "Join a room first".to_string(),
            SignalError::BadMessage(_) => "Message could not be parsed".to_string(),
            SignalError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

impl From<std::io::Error> for SignalError {
    fn from(err: std::io::Error) -> Self {
        SignalError::StorageFault(err.to_string())
    }
}
