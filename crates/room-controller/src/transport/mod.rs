//! Inbound transport boundary: the WebSocket signaling endpoint.

pub mod ws;

pub use ws::ws_router;
