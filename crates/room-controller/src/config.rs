//! Room Controller configuration.
//!
//! Configuration is loaded from environment variables at startup and is
//! immutable afterwards. Every value has a sensible default so the server
//! runs out of the box.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default maximum participants per room.
pub const DEFAULT_ROOM_CAPACITY: usize = 5;

/// Default global connection ceiling.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Default bounded wait for recording finalization confirmation.
pub const DEFAULT_FINALIZE_TIMEOUT_SECONDS: u64 = 10;

/// Default root directory for session namespaces.
pub const DEFAULT_SESSIONS_PATH: &str = "sessions";

/// Default maximum upload size in bytes (100 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Default server instance ID prefix.
pub const DEFAULT_SERVER_ID_PREFIX: &str = "parley";

/// Room Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Unique identifier for this server instance.
    pub server_id: String,

    /// Maximum participants per room.
    pub room_capacity: usize,

    /// Global ceiling on concurrently admitted connections.
    pub max_connections: usize,

    /// Bounded wait for recording finalization confirmation, in seconds.
    pub finalize_timeout_seconds: u64,

    /// Root directory for session namespaces (uploads and recordings).
    pub sessions_path: PathBuf,

    /// Maximum accepted upload size in bytes.
    pub max_upload_bytes: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("PARLEY_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let room_capacity = vars
            .get("PARLEY_ROOM_CAPACITY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_ROOM_CAPACITY);

        if room_capacity < 2 {
            return Err(ConfigError::InvalidValue(format!(
                "PARLEY_ROOM_CAPACITY must be at least 2, got {room_capacity}"
            )));
        }

        let max_connections = vars
            .get("PARLEY_MAX_CONNECTIONS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        let finalize_timeout_seconds = vars
            .get("PARLEY_FINALIZE_TIMEOUT_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_FINALIZE_TIMEOUT_SECONDS);

        if finalize_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "PARLEY_FINALIZE_TIMEOUT_SECONDS must be non-zero".to_string(),
            ));
        }

        let sessions_path = vars
            .get("PARLEY_SESSIONS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSIONS_PATH));

        let max_upload_bytes = vars
            .get("PARLEY_MAX_UPLOAD_BYTES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        let server_id = vars.get("PARLEY_SERVER_ID").cloned().unwrap_or_else(|| {
            let hostname = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_SERVER_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            server_id,
            room_capacity,
            max_connections,
            finalize_timeout_seconds,
            sessions_path,
            max_upload_bytes,
        })
    }

    /// Finalization confirmation timeout as a `Duration`.
    #[must_use]
    pub fn finalize_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.finalize_timeout_seconds)
    }
}
