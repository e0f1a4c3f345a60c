//! Storage collaborator: session namespaces, recording artifacts, uploads.
//!
//! The signaling core only talks to the [`ArtifactStore`] trait; failures
//! surface as `StorageFault` and never take down the relay path.
//! [`FsArtifactStore`] implements it over the local filesystem: one
//! directory per session namespace holding recording manifests and
//! uploaded media files.

use crate::errors::SignalError;
use crate::observability::metrics;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use signal_protocol::SessionId;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Opaque handle to an open recording artifact.
#[derive(Debug, Clone)]
pub struct ArtifactHandle {
    /// Owning session namespace.
    pub session_id: SessionId,
    /// Manifest location inside the namespace.
    manifest_path: PathBuf,
    /// When the artifact was opened.
    pub opened_at: DateTime<Utc>,
}

impl ArtifactHandle {
    /// Create a handle. Store implementations use this when opening an
    /// artifact.
    #[must_use]
    pub fn new(session_id: SessionId, manifest_path: PathBuf, opened_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            manifest_path,
            opened_at,
        }
    }

    /// Location of the artifact manifest.
    #[must_use]
    pub fn manifest_path(&self) -> &std::path::Path {
        &self.manifest_path
    }
}

/// Summary persisted when a recording finalizes.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingSummary {
    pub session_id: SessionId,
    pub room_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

/// Details of one stored file, as reported to clients.
#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub filename: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

/// Boundary contract consumed by the recording coordinator, the session
/// lifecycle manager, and the upload routes.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Create (or confirm) the namespace directory for a session.
    async fn ensure_namespace(&self, session_id: SessionId) -> Result<PathBuf, SignalError>;

    /// Open a recording artifact and write its initial manifest.
    async fn open_artifact(&self, session_id: SessionId) -> Result<ArtifactHandle, SignalError>;

    /// Close a recording artifact, persisting the final summary.
    ///
    /// `handle` is `None` when the recording stopped before the open
    /// completed; the summary is still persisted.
    async fn finalize_artifact(
        &self,
        handle: Option<ArtifactHandle>,
        summary: &RecordingSummary,
    ) -> Result<(), SignalError>;

    /// Save an uploaded media file under the session namespace, returning
    /// the stored (uniquified) filename.
    async fn save_file(
        &self,
        session_id: SessionId,
        filename: &str,
        data: Bytes,
    ) -> Result<StoredFile, SignalError>;

    /// List stored files for a session, sorted by filename.
    async fn list_files(&self, session_id: SessionId) -> Result<Vec<StoredFile>, SignalError>;

    /// The namespace is no longer actively written. Never deletes files.
    async fn release_namespace(&self, session_id: SessionId) -> Result<(), SignalError>;
}

/// Filesystem-backed artifact store.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Create a store rooted at `root`. The directory is created on first
    /// use.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn namespace_path(&self, session_id: SessionId) -> PathBuf {
        self.root.join(session_id.to_string())
    }

    fn manifest_path(&self, session_id: SessionId, opened_at: DateTime<Utc>) -> PathBuf {
        self.namespace_path(session_id)
            .join(format!("recording-{}.json", opened_at.timestamp()))
    }
}

/// Make an uploaded filename unique within its namespace: timestamp plus a
/// short random suffix, preserving the extension.
fn unique_filename(original: &str) -> String {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = uuid::Uuid::new_v4().to_string();
    let short = suffix.get(..8).unwrap_or("00000000");

    match original.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() => format!("{base}_{stamp}_{short}.{ext}"),
        _ => format!("{original}_{stamp}_{short}"),
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn ensure_namespace(&self, session_id: SessionId) -> Result<PathBuf, SignalError> {
        let path = self.namespace_path(session_id);
        tokio::fs::create_dir_all(&path).await.map_err(|e| {
            metrics::record_storage_fault("namespace");
            SignalError::StorageFault(format!("create namespace {}: {e}", path.display()))
        })?;
        debug!(
            target: "parley.storage",
            session_id = %session_id,
            path = %path.display(),
            "Session namespace ready"
        );
        Ok(path)
    }

    async fn open_artifact(&self, session_id: SessionId) -> Result<ArtifactHandle, SignalError> {
        self.ensure_namespace(session_id).await?;

        let opened_at = Utc::now();
        let manifest_path = self.manifest_path(session_id, opened_at);

        let manifest = serde_json::json!({
            "session_id": session_id,
            "status": "recording",
            "started_at": opened_at.to_rfc3339(),
        });
        let body = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| SignalError::Internal(format!("encode manifest: {e}")))?;

        tokio::fs::write(&manifest_path, body).await.map_err(|e| {
            metrics::record_storage_fault("open");
            SignalError::StorageFault(format!("open artifact {}: {e}", manifest_path.display()))
        })?;

        info!(
            target: "parley.storage",
            session_id = %session_id,
            manifest = %manifest_path.display(),
            "Recording artifact opened"
        );

        Ok(ArtifactHandle {
            session_id,
            manifest_path,
            opened_at,
        })
    }

    async fn finalize_artifact(
        &self,
        handle: Option<ArtifactHandle>,
        summary: &RecordingSummary,
    ) -> Result<(), SignalError> {
        let manifest_path = match handle {
            Some(handle) => handle.manifest_path,
            // Stop raced the open; derive the path from the summary so the
            // outcome is still persisted.
            None => self.manifest_path(summary.session_id, summary.started_at),
        };

        self.ensure_namespace(summary.session_id).await?;

        let manifest = serde_json::json!({
            "session_id": summary.session_id,
            "room_id": summary.room_id,
            "status": "complete",
            "started_at": summary.started_at.to_rfc3339(),
            "ended_at": summary.ended_at.to_rfc3339(),
            "duration_seconds": summary.duration_seconds,
        });
        let body = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| SignalError::Internal(format!("encode manifest: {e}")))?;

        tokio::fs::write(&manifest_path, body).await.map_err(|e| {
            metrics::record_storage_fault("finalize");
            SignalError::StorageFault(format!(
                "finalize artifact {}: {e}",
                manifest_path.display()
            ))
        })?;

        info!(
            target: "parley.storage",
            session_id = %summary.session_id,
            duration_seconds = summary.duration_seconds,
            "Recording artifact finalized"
        );
        Ok(())
    }

    async fn save_file(
        &self,
        session_id: SessionId,
        filename: &str,
        data: Bytes,
    ) -> Result<StoredFile, SignalError> {
        let namespace = self.ensure_namespace(session_id).await?;

        let stored_name = unique_filename(filename);
        let path = namespace.join(&stored_name);
        let size_bytes = data.len() as u64;

        tokio::fs::write(&path, &data).await.map_err(|e| {
            metrics::record_storage_fault("save");
            SignalError::StorageFault(format!("save file {}: {e}", path.display()))
        })?;

        info!(
            target: "parley.storage",
            session_id = %session_id,
            filename = %stored_name,
            size_bytes,
            "File saved"
        );

        Ok(StoredFile {
            filename: stored_name,
            size_bytes,
            modified_at: Some(Utc::now().to_rfc3339()),
        })
    }

    async fn list_files(&self, session_id: SessionId) -> Result<Vec<StoredFile>, SignalError> {
        let namespace = self.namespace_path(session_id);

        let mut entries = match tokio::fs::read_dir(&namespace).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                metrics::record_storage_fault("list");
                return Err(SignalError::StorageFault(format!(
                    "list {}: {e}",
                    namespace.display()
                )));
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            metrics::record_storage_fault("list");
            SignalError::StorageFault(format!("list {}: {e}", namespace.display()))
        })? {
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };

            let modified_at = metadata
                .modified()
                .ok()
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339());

            files.push(StoredFile {
                filename: entry.file_name().to_string_lossy().into_owned(),
                size_bytes: metadata.len(),
                modified_at,
            });
        }

        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    async fn release_namespace(&self, session_id: SessionId) -> Result<(), SignalError> {
        // Files are kept; release only marks the namespace quiescent.
        let namespace = self.namespace_path(session_id);
        if !namespace.exists() {
            warn!(
                target: "parley.storage",
                session_id = %session_id,
                "Releasing namespace that was never materialized"
            );
        }
        debug!(
            target: "parley.storage",
            session_id = %session_id,
            "Session namespace released"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, FsArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_unique_filename_keeps_extension() {
        let name = unique_filename("clip.webm");
        assert!(name.starts_with("clip_"));
        assert!(name.ends_with(".webm"));
        assert_ne!(name, unique_filename("clip.webm"));
    }

    #[test]
    fn test_unique_filename_without_extension() {
        let name = unique_filename("blob");
        assert!(name.starts_with("blob_"));
        assert!(!name.contains('.'));
    }

    #[tokio::test]
    async fn test_open_then_finalize_artifact() {
        let (_dir, store) = test_store();
        let session_id = SessionId::new();

        let handle = store.open_artifact(session_id).await.unwrap();
        let started_at = handle.opened_at;

        let summary = RecordingSummary {
            session_id,
            room_id: "alpha".to_string(),
            started_at,
            ended_at: started_at + chrono::Duration::seconds(12),
            duration_seconds: 12.0,
        };
        store.finalize_artifact(Some(handle), &summary).await.unwrap();

        let files = store.list_files(session_id).await.unwrap();
        assert_eq!(files.len(), 1);
        assert!(files.first().unwrap().filename.starts_with("recording-"));
    }

    #[tokio::test]
    async fn test_finalize_without_handle_still_persists() {
        let (_dir, store) = test_store();
        let session_id = SessionId::new();
        let started_at = Utc::now();

        let summary = RecordingSummary {
            session_id,
            room_id: "alpha".to_string(),
            started_at,
            ended_at: started_at,
            duration_seconds: 0.0,
        };
        store.finalize_artifact(None, &summary).await.unwrap();

        let files = store.list_files(session_id).await.unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_save_and_list_files_sorted() {
        let (_dir, store) = test_store();
        let session_id = SessionId::new();

        store
            .save_file(session_id, "b.webm", Bytes::from_static(b"bbbb"))
            .await
            .unwrap();
        store
            .save_file(session_id, "a.webm", Bytes::from_static(b"aa"))
            .await
            .unwrap();

        let files = store.list_files(session_id).await.unwrap();
        assert_eq!(files.len(), 2);
        let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[tokio::test]
    async fn test_list_files_for_unknown_session_is_empty() {
        let (_dir, store) = test_store();
        let files = store.list_files(SessionId::new()).await.unwrap();
        assert!(files.is_empty());
    }
}
