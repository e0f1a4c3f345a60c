//! Test utilities shared by this crate's unit tests and the `rc-test-utils`
//! crate.
//!
//! This module is the single source for the in-memory [`ChannelTransport`]
//! (standing in for a WebSocket write half), [`spawn_test_connection`], and
//! the [`FrameReceiver`] used to assert on the frames a client would have
//! received.
//!
//! It is only compiled for this crate's own tests (`cfg(test)`) or when a
//! downstream dev-dependency enables the `test-support` feature. Keeping the
//! helpers inside `room-controller` lets the crate's in-module unit tests use
//! them without pulling in a second copy of `room-controller` through the
//! `rc-test-utils` dev-dependency cycle.

use crate::actors::connection::{ConnectionActor, ConnectionActorHandle};
use crate::actors::MessageTransport;
use crate::errors::SignalError;
use async_trait::async_trait;
use signal_protocol::{ConnectionId, ServerMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// In-memory transport that collects outbound frames.
pub struct ChannelTransport {
    frames: mpsc::UnboundedSender<String>,
    closed: bool,
}

impl ChannelTransport {
    /// Create a transport and the receiving end for its frames.
    pub fn pair() -> (Self, FrameReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                frames: tx,
                closed: false,
            },
            FrameReceiver { inner: rx },
        )
    }
}

#[async_trait]
impl MessageTransport for ChannelTransport {
    async fn send_text(&mut self, frame: String) -> Result<(), SignalError> {
        if self.closed {
            return Err(SignalError::Internal("transport closed".to_string()));
        }
        self.frames
            .send(frame)
            .map_err(|e| SignalError::Internal(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), SignalError> {
        self.closed = true;
        Ok(())
    }
}

/// Receiving end of a test connection's frames.
pub struct FrameReceiver {
    inner: mpsc::UnboundedReceiver<String>,
}

impl FrameReceiver {
    /// Await the next frame, parsed as a [`ServerMessage`].
    ///
    /// # Panics
    ///
    /// Panics when the connection closed or the frame is not valid protocol
    /// JSON; either is a test failure.
    pub async fn next_message(&mut self) -> ServerMessage {
        let frame = self
            .inner
            .recv()
            .await
            .expect("connection closed while a frame was expected");
        serde_json::from_str(&frame).expect("frame is not a valid ServerMessage")
    }

    /// Await the next raw frame string.
    ///
    /// # Panics
    ///
    /// Panics when the connection closed.
    pub async fn next_raw(&mut self) -> String {
        self.inner
            .recv()
            .await
            .expect("connection closed while a frame was expected")
    }

    /// True when no frame is currently buffered.
    pub fn is_empty(&mut self) -> bool {
        match self.inner.try_recv() {
            Err(mpsc::error::TryRecvError::Empty | mpsc::error::TryRecvError::Disconnected) => true,
            Ok(frame) => panic!("expected no frames, found: {frame}"),
        }
    }
}

/// Spawn a connection actor wired to an in-memory transport.
///
/// Returns the handle (register it with the `ConnectionRegistry`) and the
/// frame receiver for assertions.
pub fn spawn_test_connection(
    cancel_token: CancellationToken,
) -> (ConnectionActorHandle, FrameReceiver) {
    let (transport, frames) = ChannelTransport::pair();
    let (handle, _task) =
        ConnectionActor::spawn(ConnectionId::new(), Box::new(transport), cancel_token);
    (handle, frames)
}
