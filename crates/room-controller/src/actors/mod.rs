//! Actor model implementation for the Room Controller.
//!
//! The actor hierarchy:
//!
//! ```text
//! RoomSupervisorActor (singleton per server instance)
//! ├── supervises N RoomActors
//! │   └── RoomActor (one per live room)
//! │       ├── owns room membership and the recording state machine
//! │       └── routes negotiation messages between participants
//! └── ConnectionActor (one per WebSocket, owned by the transport layer)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer per room**: membership mutation and relay serialize
//!   through the room's mailbox; unrelated rooms never contend
//! - **CancellationToken propagation**: the supervisor's root token parents
//!   every room and connection token for graceful shutdown
//! - **Message passing**: all inter-actor communication via
//!   `tokio::sync::mpsc`, request-reply via `tokio::sync::oneshot`
//!
//! # Modules
//!
//! - [`controller`] - `RoomSupervisorActor` singleton that supervises rooms
//! - [`room`] - `RoomActor` per live room: membership, relay, recording
//! - [`connection`] - `ConnectionActor` per client connection (writer)
//! - [`messages`] - Message types for actor communication

pub mod connection;
pub mod controller;
pub mod messages;
pub mod room;

// Re-export primary types
pub use connection::{ConnectionActor, ConnectionActorHandle, MessageTransport};
pub use controller::RoomSupervisorHandle;
pub use messages::*;
pub use room::{RoomActor, RoomActorHandle};
