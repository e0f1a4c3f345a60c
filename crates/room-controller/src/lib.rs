//! Room Controller Service Library
//!
//! This library provides the core functionality for the Parley Room
//! Controller - a stateful WebSocket signaling server responsible for:
//!
//! - Room membership with capacity limits and join-order determinism
//! - Relaying opaque WebRTC negotiation payloads between the right peers
//! - A per-room recording state machine tied to room activity
//! - Session namespaces shared by uploads and recording artifacts
//!
//! # Architecture
//!
//! The server uses an actor model hierarchy:
//!
//! ```text
//! RoomSupervisorActor (singleton per server instance)
//! ├── supervises N RoomActors
//! │   └── RoomActor (one per live room)
//! │       ├── owns membership, relay routing, recording state
//! │       └── delivers via ConnectionActor mailboxes
//! └── ConnectionActor (one per WebSocket connection)
//! ```
//!
//! # Key Design Decisions
//!
//! - **In-memory state**: rooms and connections are process-scoped; nothing
//!   survives a restart
//! - **Per-room serialization**: each room is a single-writer actor, so
//!   racing joins into the last slot resolve to exactly one winner
//! - **Exactly-once disconnect**: the registry's removal gate arbitrates
//!   between the read loop and write-failure cleanup paths
//!
//! # Modules
//!
//! - [`actors`] - Actor model implementation
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error taxonomy with wire code mapping
//! - [`registry`] - Connection Registry
//! - [`recording`] - Recording state machine
//! - [`session`] - Session lifecycle manager
//! - [`storage`] - Artifact store boundary and filesystem implementation
//! - [`transport`] - WebSocket signaling endpoint
//! - [`http`] - Upload, session file and stats routes
//! - [`observability`] - Health probes and metrics

pub mod actors;
pub mod config;
pub mod errors;
pub mod http;
pub mod observability;
pub mod recording;
pub mod registry;
pub mod session;
pub mod state;
pub mod storage;
pub mod transport;

/// Shared test utilities, compiled for this crate's own tests and for
/// downstream dev-dependencies that enable the `test-support` feature.
#[cfg(any(test, feature = "test-support"))]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
pub mod test_support;
