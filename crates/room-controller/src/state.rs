//! Shared application state handed to the HTTP and WebSocket layers.

use crate::actors::RoomSupervisorHandle;
use crate::config::Config;
use crate::registry::ConnectionRegistry;
use crate::session::SessionManager;
use crate::storage::ArtifactStore;

use std::sync::Arc;

/// Everything a request handler needs, constructed once at startup.
///
/// Registries and managers are owned here and passed by handle; there are
/// no ambient globals.
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
    pub supervisor: RoomSupervisorHandle,
    pub sessions: Arc<SessionManager>,
    pub store: Arc<dyn ArtifactStore>,
}
