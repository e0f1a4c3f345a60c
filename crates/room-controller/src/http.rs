//! HTTP API: media upload, session file listing, server stats.
//!
//! Uploads land in the room's session namespace so client-side recordings
//! and server-side recording manifests share one directory. These routes
//! ride on the same listener as the signaling endpoint.

use crate::observability::metrics;
use crate::state::AppState;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use signal_protocol::SessionId;
use std::sync::Arc;
use tracing::{info, warn};

/// Create the API router.
pub fn api_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/upload", post(upload_handler))
        .route("/sessions/:session_id/files", get(session_files_handler))
        .route("/stats", get(stats_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    session_id: SessionId,
}

/// `POST /upload?session_id=` - store one audio or video part.
async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "success": false,
                        "message": format!("malformed multipart body: {e}"),
                    })),
                );
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        if name != "audio" && name != "video" {
            continue;
        }

        let filename = field
            .file_name()
            .map_or_else(|| format!("{name}_upload.bin"), ToString::to_string);

        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "success": false,
                        "message": format!("failed to read {name} part: {e}"),
                    })),
                );
            }
        };

        if data.len() > state.config.max_upload_bytes {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({
                    "success": false,
                    "message": "file exceeds the upload size limit",
                })),
            );
        }

        let size = data.len() as u64;
        return match state
            .store
            .save_file(params.session_id, &filename, data)
            .await
        {
            Ok(stored) => {
                metrics::record_upload(size);
                info!(
                    target: "parley.http",
                    session_id = %params.session_id,
                    filename = %stored.filename,
                    size_bytes = stored.size_bytes,
                    "Upload stored"
                );
                (
                    StatusCode::OK,
                    Json(json!({
                        "success": true,
                        "session_id": params.session_id,
                        "filename": stored.filename,
                        "file_size": stored.size_bytes,
                    })),
                )
            }
            Err(e) => {
                warn!(
                    target: "parley.http",
                    session_id = %params.session_id,
                    error = %e,
                    "Upload failed"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "success": false,
                        "message": e.client_message(),
                    })),
                )
            }
        };
    }

    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "success": false,
            "message": "no audio or video part found",
        })),
    )
}

/// `GET /sessions/:session_id/files` - list a session's stored files.
async fn session_files_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
) -> impl IntoResponse {
    match state.store.list_files(session_id).await {
        Ok(files) => {
            let total_size: u64 = files.iter().map(|f| f.size_bytes).sum();
            let file_count = files.len();
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "session_id": session_id,
                    "files": files,
                    "file_count": file_count,
                    "total_size": total_size,
                })),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "message": e.client_message(),
            })),
        ),
    }
}

/// `GET /stats` - live counters for the operator.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.supervisor.get_status().await {
        Ok(status) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "stats": {
                    "connections": state.registry.connection_count(),
                    "rooms": status.room_count,
                    "sessions": state.sessions.active_count(),
                    "is_draining": status.is_draining,
                },
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "message": e.client_message(),
            })),
        ),
    }
}
