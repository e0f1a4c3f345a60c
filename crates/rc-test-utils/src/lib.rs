//! # Room Controller Test Utilities
//!
//! Shared test utilities for the Parley Room Controller.
//!
//! Provides an in-memory [`ChannelTransport`] standing in for a WebSocket
//! write half, plus [`spawn_test_connection`] to get a ready-to-register
//! connection actor and a [`FrameReceiver`] for asserting on the frames a
//! client would have received.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::spawn_test_connection;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let (handle, mut frames) = spawn_test_connection(CancellationToken::new());
//!     registry.admit(handle).unwrap();
//!
//!     // ... drive the system ...
//!
//!     let frame = frames.next_message().await;
//! }
//! ```

// The helpers live in `room-controller` behind its `test-support` feature so
// there is a single source shared with that crate's own unit tests. Re-export
// them here so downstream tests keep using the `rc_test_utils::` path.
pub use room_controller::test_support::{ChannelTransport, FrameReceiver, spawn_test_connection};
