//! WebSocket signaling endpoint.
//!
//! `GET /ws` upgrades to a WebSocket carrying JSON text frames. Each
//! accepted socket gets:
//! - a `ConnectionActor` owning the write half (the only socket writer)
//! - this module's read loop parsing inbound frames and dispatching them
//!
//! The read loop is the disconnect authority: whether the socket errors,
//! the client closes, or the writer cancels after a failed send, cleanup
//! funnels through the registry's exactly-once removal gate.

use crate::actors::connection::ConnectionActor;
use crate::actors::{RecordingCommand, RelaySignal, RoomActorHandle};
use crate::errors::SignalError;
use crate::state::AppState;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use signal_protocol::{ClientMessage, ConnectionId, ServerMessage};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Create the signaling router.
pub fn ws_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_session(state, socket))
}

/// WebSocket write half as a [`MessageTransport`].
///
/// [`MessageTransport`]: crate::actors::MessageTransport
struct WsTransport {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait::async_trait]
impl crate::actors::MessageTransport for WsTransport {
    async fn send_text(&mut self, frame: String) -> Result<(), SignalError> {
        self.sink
            .send(Message::Text(frame))
            .await
            .map_err(|e| SignalError::Internal(format!("websocket send: {e}")))
    }

    async fn close(&mut self) -> Result<(), SignalError> {
        self.sink
            .send(Message::Close(None))
            .await
            .map_err(|e| SignalError::Internal(format!("websocket close: {e}")))
    }
}

/// Drive one client connection from accept to cleanup.
async fn client_session(state: Arc<AppState>, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let connection_id = ConnectionId::new();
    let cancel_token = state.supervisor.child_token();

    let (handle, _writer_task) = ConnectionActor::spawn(
        connection_id,
        Box::new(WsTransport { sink }),
        cancel_token.clone(),
    );

    if let Err(e) = state.registry.admit(handle.clone()) {
        warn!(
            target: "parley.transport",
            connection_id = %connection_id,
            error = %e,
            "Connection rejected at global ceiling"
        );
        let _ = handle.try_deliver(ServerMessage::Error {
            code: e.error_code(),
            message: e.client_message(),
        });
        handle.close("capacity exceeded");
        return;
    }

    info!(
        target: "parley.transport",
        connection_id = %connection_id,
        open_connections = state.registry.connection_count(),
        "Client connected"
    );

    let _ = state
        .registry
        .send(connection_id, ServerMessage::Welcome { connection_id });

    let mut session = ClientSession {
        state: Arc::clone(&state),
        connection_id,
        room: None,
    };

    session.read_loop(stream, &cancel_token).await;
    session.disconnect().await;
}

/// Per-connection read-side state.
struct ClientSession {
    state: Arc<AppState>,
    connection_id: ConnectionId,
    room: Option<RoomActorHandle>,
}

impl ClientSession {
    /// Consume inbound frames until the socket dies or the connection is
    /// cancelled.
    async fn read_loop(
        &mut self,
        mut stream: SplitStream<WebSocket>,
        cancel_token: &tokio_util::sync::CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,

                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                        Some(Ok(Message::Close(_))) | None => break,
                        // Pings are answered by the protocol layer; binary
                        // frames are not part of this protocol.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(
                                target: "parley.transport",
                                connection_id = %self.connection_id,
                                error = %e,
                                "WebSocket read error"
                            );
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Parse and dispatch one inbound frame; failures go back to the client
    /// as error frames and never tear down other sessions.
    async fn handle_frame(&mut self, text: &str) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(
                    target: "parley.transport",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Unparseable frame"
                );
                self.report(&SignalError::BadMessage(e.to_string()));
                return;
            }
        };

        if let Err(e) = self.dispatch(message).await {
            self.report(&e);
        }
    }

    async fn dispatch(&mut self, message: ClientMessage) -> Result<(), SignalError> {
        match message {
            ClientMessage::Join { room_id } => self.handle_join(room_id).await,

            ClientMessage::Leave => self.handle_leave().await,

            ClientMessage::Offer { target, payload } => {
                self.relay(RelaySignal::Offer { target, payload }).await
            }

            ClientMessage::Answer { target, payload } => {
                self.relay(RelaySignal::Answer { target, payload }).await
            }

            ClientMessage::Candidate { target, payload } => {
                self.relay(RelaySignal::Candidate { target, payload }).await
            }

            ClientMessage::StartRecording => self.recording(RecordingCommand::Start).await,

            ClientMessage::StopRecording => self.recording(RecordingCommand::Stop).await,
        }
    }

    async fn handle_join(&mut self, room_id: String) -> Result<(), SignalError> {
        let outcome = self
            .state
            .supervisor
            .join_room(self.connection_id, room_id)
            .await?;

        let joined = outcome.joined;
        self.room = Some(outcome.room);

        let _ = self.state.registry.send(
            self.connection_id,
            ServerMessage::RoomJoined {
                room_id: joined.room_id,
                connection_id: self.connection_id,
                session_id: joined.session_id,
                peers: joined.peers,
                capacity: joined.capacity,
            },
        );
        Ok(())
    }

    async fn handle_leave(&mut self) -> Result<(), SignalError> {
        let left = self
            .state
            .supervisor
            .leave(self.connection_id, "leave")
            .await?;
        self.room = None;

        if let Some(room_id) = left {
            let _ = self
                .state
                .registry
                .send(self.connection_id, ServerMessage::RoomLeft { room_id });
        }
        Ok(())
    }

    async fn relay(&mut self, signal: RelaySignal) -> Result<(), SignalError> {
        let room = self.room.as_ref().ok_or(SignalError::NotInRoom)?;
        room.relay(self.connection_id, signal).await
    }

    async fn recording(&mut self, command: RecordingCommand) -> Result<(), SignalError> {
        let room = self.room.as_ref().ok_or(SignalError::NotInRoom)?;
        room.recording(self.connection_id, command).await
    }

    fn report(&self, error: &SignalError) {
        let _ = self.state.registry.send(
            self.connection_id,
            ServerMessage::Error {
                code: error.error_code(),
                message: error.client_message(),
            },
        );
    }

    /// Disconnect cleanup, exactly once.
    ///
    /// The registry removal gate decides the winner when the read loop and
    /// a write-failure path race here; only the winner runs room cleanup.
    async fn disconnect(&mut self) {
        let Some(handle) = self.state.registry.remove(self.connection_id) else {
            return;
        };

        if let Err(e) = self
            .state
            .supervisor
            .leave(self.connection_id, "disconnect")
            .await
        {
            warn!(
                target: "parley.transport",
                connection_id = %self.connection_id,
                error = %e,
                "Leave on disconnect failed"
            );
        }

        handle.close("disconnected");
        self.room = None;

        info!(
            target: "parley.transport",
            connection_id = %self.connection_id,
            open_connections = self.state.registry.connection_count(),
            "Client disconnected"
        );
    }
}
