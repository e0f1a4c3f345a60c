//! `ConnectionActor` - per-connection writer actor.
//!
//! Each `ConnectionActor`:
//! - Owns the write half of exactly one client connection (behind
//!   [`MessageTransport`])
//! - Serializes [`ServerMessage`] values into JSON text frames
//! - Is the only task that ever writes to the socket, so frames delivered
//!   through its mailbox reach the client in mailbox order
//!
//! # Lifecycle
//!
//! 1. Spawned when the transport layer accepts a connection
//! 2. Runs until the connection closes, a write fails, or the actor is
//!    cancelled
//! 3. Cancellation propagates from the supervisor's root token

use crate::errors::SignalError;

use super::messages::ConnectionMessage;

use async_trait::async_trait;
use signal_protocol::{ConnectionId, ServerMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bounded mailbox size per connection. A client that cannot drain this many
/// frames is considered congested and further fan-out to it is dropped.
pub const CONNECTION_CHANNEL_BUFFER: usize = 256;

/// Write half of a client connection.
///
/// The WebSocket layer implements this for the real socket; tests substitute
/// an in-memory collector.
#[async_trait]
pub trait MessageTransport: Send {
    /// Write one text frame to the client.
    async fn send_text(&mut self, frame: String) -> Result<(), SignalError>;

    /// Close the underlying connection.
    async fn close(&mut self) -> Result<(), SignalError>;
}

/// Why a frame could not be enqueued for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The connection's mailbox is full (slow client).
    Full,
    /// The connection is gone.
    Closed,
}

/// Handle to a `ConnectionActor`.
#[derive(Debug, Clone)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: ConnectionId,
}

impl ConnectionActorHandle {
    /// Get the connection ID.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Enqueue a frame for delivery without blocking.
    ///
    /// Fan-out paths must never stall on one congested client, so delivery
    /// uses the bounded mailbox and reports `Full` instead of waiting.
    pub fn try_deliver(&self, message: ServerMessage) -> Result<(), DeliveryError> {
        self.sender
            .try_send(ConnectionMessage::Deliver(message))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Request a graceful close. Falls back to cancellation when the mailbox
    /// is unreachable.
    pub fn close(&self, reason: &str) {
        let queued = self.sender.try_send(ConnectionMessage::Close {
            reason: reason.to_string(),
        });
        if queued.is_err() {
            self.cancel_token.cancel();
        }
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    /// Connection ID.
    connection_id: ConnectionId,
    /// Message receiver.
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Cancellation token (child of the supervisor's token).
    cancel_token: CancellationToken,
    /// Write half of the client connection.
    transport: Box<dyn MessageTransport>,
    /// Whether the connection is closing.
    is_closing: bool,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        connection_id: ConnectionId,
        transport: Box<dyn MessageTransport>,
        cancel_token: CancellationToken,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);

        let actor = Self {
            connection_id,
            receiver,
            cancel_token: cancel_token.clone(),
            transport,
            is_closing: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    async fn run(mut self) {
        debug!(
            target: "parley.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.graceful_close("cancelled").await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            let should_exit = self.handle_message(message).await;
                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            self.graceful_close("mailbox closed").await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "parley.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver(frame) => {
                self.handle_deliver(frame).await;
                // A failed write cancels the token; exit on the next pass.
                self.cancel_token.is_cancelled()
            }

            ConnectionMessage::Close { reason } => {
                self.graceful_close(&reason).await;
                true
            }
        }
    }

    /// Serialize and write one frame to the client.
    async fn handle_deliver(&mut self, frame: ServerMessage) {
        if self.is_closing {
            return;
        }

        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    target: "parley.actor.connection",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Failed to serialize outbound frame"
                );
                return;
            }
        };

        if let Err(e) = self.transport.send_text(text).await {
            debug!(
                target: "parley.actor.connection",
                connection_id = %self.connection_id,
                error = %e,
                "Write failed, closing connection"
            );
            // Wake the read loop so disconnect cleanup runs promptly.
            self.cancel_token.cancel();
        }
    }

    /// Gracefully close the connection.
    async fn graceful_close(&mut self, reason: &str) {
        if self.is_closing {
            return;
        }

        self.is_closing = true;

        debug!(
            target: "parley.actor.connection",
            connection_id = %self.connection_id,
            reason = %reason,
            "Closing connection"
        );

        if let Err(e) = self.transport.close().await {
            debug!(
                target: "parley.actor.connection",
                connection_id = %self.connection_id,
                error = %e,
                "Error closing transport"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Transport that collects frames into an unbounded channel.
    struct TestTransport {
        frames: mpsc::UnboundedSender<String>,
        closed: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl MessageTransport for TestTransport {
        async fn send_text(&mut self, frame: String) -> Result<(), SignalError> {
            self.frames
                .send(frame)
                .map_err(|e| SignalError::Internal(e.to_string()))
        }

        async fn close(&mut self) -> Result<(), SignalError> {
            let _ = self.closed.send(());
            Ok(())
        }
    }

    fn test_actor() -> (
        ConnectionActorHandle,
        JoinHandle<()>,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedReceiver<()>,
    ) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let transport = TestTransport {
            frames: frames_tx,
            closed: closed_tx,
        };
        let (handle, task) = ConnectionActor::spawn(
            ConnectionId::new(),
            Box::new(transport),
            CancellationToken::new(),
        );
        (handle, task, frames_rx, closed_rx)
    }

    #[tokio::test]
    async fn test_deliver_writes_json_frame() {
        let (handle, _task, mut frames, _closed) = test_actor();

        handle
            .try_deliver(ServerMessage::Welcome {
                connection_id: handle.connection_id(),
            })
            .unwrap();

        let frame = frames.recv().await.unwrap();
        assert!(frame.contains(r#""type":"welcome""#));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_frames_are_delivered_in_order() {
        let (handle, _task, mut frames, _closed) = test_actor();

        for _ in 0..10 {
            handle
                .try_deliver(ServerMessage::PeerLeft {
                    connection_id: ConnectionId::new(),
                })
                .unwrap();
        }
        handle
            .try_deliver(ServerMessage::Welcome {
                connection_id: handle.connection_id(),
            })
            .unwrap();

        let mut received = Vec::new();
        for _ in 0..11 {
            received.push(frames.recv().await.unwrap());
        }
        assert!(received.last().unwrap().contains("welcome"));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_close_shuts_down_transport_and_task() {
        let (handle, task, _frames, mut closed) = test_actor();

        handle.close("test close");

        closed.recv().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_stops_actor() {
        let (handle, task, _frames, _closed) = test_actor();

        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_deliver_after_task_exit_reports_closed() {
        let (handle, task, _frames, _closed) = test_actor();

        handle.close("bye");
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        // Mailbox receiver is dropped with the actor.
        let result = handle.try_deliver(ServerMessage::PeerLeft {
            connection_id: ConnectionId::new(),
        });
        assert_eq!(result, Err(DeliveryError::Closed));
    }
}
