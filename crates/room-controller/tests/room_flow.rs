//! Actor-level integration tests: room lifecycle, relay semantics and the
//! recording state machine, driven through the supervisor the way the
//! transport layer drives it.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rc_test_utils::{spawn_test_connection, FrameReceiver};
use room_controller::actors::{RecordingCommand, RelaySignal, RoomSupervisorHandle};
use room_controller::errors::SignalError;
use room_controller::registry::ConnectionRegistry;
use room_controller::session::SessionManager;
use room_controller::storage::{
    ArtifactHandle, ArtifactStore, FsArtifactStore, RecordingSummary, StoredFile,
};
use signal_protocol::{ConnectionId, ErrorCode, RecordingPhase, ServerMessage, SessionId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Harness {
    _dir: tempfile::TempDir,
    supervisor: RoomSupervisorHandle,
    registry: Arc<ConnectionRegistry>,
}

fn build_harness(
    room_capacity: usize,
    dir: tempfile::TempDir,
    store: Arc<dyn ArtifactStore>,
) -> Harness {
    let registry = Arc::new(ConnectionRegistry::new(64));
    let sessions = Arc::new(SessionManager::new(Arc::clone(&store)));

    let supervisor = RoomSupervisorHandle::new(
        "parley-test".to_string(),
        room_capacity,
        Duration::from_secs(2),
        Arc::clone(&registry),
        sessions,
        store,
    );

    Harness {
        _dir: dir,
        supervisor,
        registry,
    }
}

fn harness_with_store(room_capacity: usize, store: Arc<dyn ArtifactStore>) -> Harness {
    build_harness(room_capacity, tempfile::tempdir().unwrap(), store)
}

fn harness(room_capacity: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(dir.path()));
    build_harness(room_capacity, dir, store)
}

fn connect(harness: &Harness) -> (ConnectionId, FrameReceiver) {
    let (handle, frames) = spawn_test_connection(CancellationToken::new());
    let id = handle.connection_id();
    harness.registry.admit(handle).unwrap();
    (id, frames)
}

/// Room "alpha", capacity 2. A joins and sees nobody; B joins
/// and sees [A] while A is notified; C is rejected without touching
/// membership.
#[tokio::test]
async fn test_capacity_two_join_scenario() {
    let h = harness(2);
    let (a, mut fa) = connect(&h);
    let (b, _fb) = connect(&h);
    let (c, mut fc) = connect(&h);

    let join_a = h.supervisor.join_room(a, "alpha".to_string()).await.unwrap();
    assert!(join_a.joined.peers.is_empty());

    let join_b = h.supervisor.join_room(b, "alpha".to_string()).await.unwrap();
    assert_eq!(join_b.joined.peers, vec![a]);
    assert_eq!(join_a.joined.session_id, join_b.joined.session_id);

    // A is told that B arrived.
    let frame = fa.next_message().await;
    assert!(
        matches!(frame, ServerMessage::PeerJoined { connection_id, participant_count }
            if connection_id == b && participant_count == 2)
    );

    // C bounces off the full room.
    let rejected = h.supervisor.join_room(c, "alpha".to_string()).await;
    assert!(matches!(rejected, Err(SignalError::RoomFull(room)) if room == "alpha"));

    let state = join_a.room.get_state().await.unwrap();
    assert_eq!(state.participants, vec![a, b]);

    // Neither A nor C saw any frame from the rejected join.
    assert!(fa.is_empty());
    assert!(fc.is_empty());
}

/// Concurrent joins never overshoot capacity; with one slot
/// contended, exactly one of the racers wins.
#[tokio::test]
async fn test_concurrent_joins_never_overshoot() {
    let h = harness(2);

    let mut ids = Vec::new();
    let mut receivers = Vec::new();
    for _ in 0..8 {
        let (id, frames) = connect(&h);
        ids.push(id);
        receivers.push(frames);
    }

    let mut tasks = Vec::new();
    for id in ids {
        let supervisor = h.supervisor.clone();
        tasks.push(tokio::spawn(async move {
            supervisor.join_room(id, "alpha".to_string()).await
        }));
    }

    let mut successes = 0;
    let mut full = 0;
    let mut winner = None;
    for task in tasks {
        match task.await.unwrap() {
            Ok(outcome) => {
                successes += 1;
                winner = Some(outcome);
            }
            Err(SignalError::RoomFull(_)) => full += 1,
            Err(other) => panic!("unexpected join error: {other}"),
        }
    }

    assert_eq!(successes, 2);
    assert_eq!(full, 6);

    let state = winner.unwrap().room.get_state().await.unwrap();
    assert_eq!(state.participants.len(), 2);
}

/// Relay ordering: frames from one sender to one target arrive in send
/// order regardless of interleaving with another sender.
#[tokio::test]
async fn test_relay_preserves_per_sender_order() {
    let h = harness(5);
    let (a, _fa) = connect(&h);
    let (b, mut fb) = connect(&h);
    let (c, _fc) = connect(&h);

    let room = h
        .supervisor
        .join_room(a, "alpha".to_string())
        .await
        .unwrap()
        .room;
    h.supervisor.join_room(b, "alpha".to_string()).await.unwrap();
    h.supervisor.join_room(c, "alpha".to_string()).await.unwrap();

    // B joined before C, so its only pending frame is C's arrival.
    let _ = fb.next_message().await;

    for i in 0..20 {
        room.relay(
            a,
            RelaySignal::Offer {
                target: b,
                payload: serde_json::json!({"seq": i, "sender": "a"}),
            },
        )
        .await
        .unwrap();
        room.relay(
            c,
            RelaySignal::Candidate {
                target: Some(b),
                payload: serde_json::json!({"seq": i, "sender": "c"}),
            },
        )
        .await
        .unwrap();
    }

    let mut a_seen = Vec::new();
    let mut c_seen = Vec::new();
    while a_seen.len() < 20 || c_seen.len() < 20 {
        match fb.next_message().await {
            ServerMessage::Offer { from, payload } => {
                assert_eq!(from, a);
                a_seen.push(payload["seq"].as_i64().unwrap());
            }
            ServerMessage::Candidate { from, payload } => {
                assert_eq!(from, c);
                c_seen.push(payload["seq"].as_i64().unwrap());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    assert_eq!(a_seen, (0..20).collect::<Vec<_>>());
    assert_eq!(c_seen, (0..20).collect::<Vec<_>>());
}

/// An offer to a peer that just dropped comes back as a
/// `NotFound` error, the relay survives, and a retry after reconnect lands.
#[tokio::test]
async fn test_offer_to_briefly_disconnected_peer() {
    let h = harness(5);
    let (a, mut fa) = connect(&h);
    let (b, _fb) = connect(&h);

    let room = h
        .supervisor
        .join_room(a, "alpha".to_string())
        .await
        .unwrap()
        .room;
    h.supervisor.join_room(b, "alpha".to_string()).await.unwrap();
    let _ = fa.next_message().await; // B joined

    // B drops; the write-failure path has not run leave yet.
    h.registry.remove(b).unwrap();

    room.relay(
        a,
        RelaySignal::Offer {
            target: b,
            payload: serde_json::json!({"sdp": "v=0"}),
        },
    )
    .await
    .unwrap();

    let frame = fa.next_message().await;
    assert!(matches!(
        frame,
        ServerMessage::Error {
            code: ErrorCode::NotFound,
            ..
        }
    ));

    // B reconnects with a fresh identity and A retries.
    let (b2, mut fb2) = connect(&h);
    h.supervisor.join_room(b2, "alpha".to_string()).await.unwrap();
    let _ = fa.next_message().await; // B2 joined

    room.relay(
        a,
        RelaySignal::Offer {
            target: b2,
            payload: serde_json::json!({"sdp": "v=0,retry"}),
        },
    )
    .await
    .unwrap();

    let frame = fb2.next_message().await;
    assert!(matches!(frame, ServerMessage::Offer { from, .. } if from == a));
}

/// The sole participant starts recording and disconnects; the
/// coordinator stops automatically and the artifact manifest is finalized
/// on disk without an explicit stop command.
#[tokio::test]
async fn test_recording_auto_stops_when_last_participant_disconnects() {
    let h = harness(5);
    let (a, _fa) = connect(&h);

    let outcome = h.supervisor.join_room(a, "alpha".to_string()).await.unwrap();
    let session_id = outcome.joined.session_id;
    outcome
        .room
        .recording(a, RecordingCommand::Start)
        .await
        .unwrap();

    // Let the artifact open before the disconnect.
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.registry.remove(a).unwrap();
    h.supervisor.leave(a, "disconnect").await.unwrap();

    // The finalizer runs in the background; poll for the completed
    // manifest.
    let manifest_dir = h._dir.path().join(session_id.to_string());
    let mut finalized = false;
    for _ in 0..100 {
        if let Ok(entries) = std::fs::read_dir(&manifest_dir) {
            for entry in entries.flatten() {
                let body = std::fs::read_to_string(entry.path()).unwrap_or_default();
                if body.contains("\"complete\"") {
                    finalized = true;
                }
            }
        }
        if finalized {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(finalized, "recording manifest was never finalized");
}

/// Recording start/stop notifications and the `AlreadyRecording` rejection.
#[tokio::test]
async fn test_recording_commands_and_notifications() {
    let h = harness(5);
    let (a, mut fa) = connect(&h);
    let (b, mut fb) = connect(&h);

    let room = h
        .supervisor
        .join_room(a, "alpha".to_string())
        .await
        .unwrap()
        .room;
    h.supervisor.join_room(b, "alpha".to_string()).await.unwrap();
    let _ = fa.next_message().await; // B joined

    room.recording(a, RecordingCommand::Start).await.unwrap();

    // Initiator gets the confirmation plus the room-wide status frame.
    let frame = fa.next_message().await;
    assert!(matches!(frame, ServerMessage::RecordingStarted { .. }));
    let frame = fa.next_message().await;
    assert!(matches!(
        frame,
        ServerMessage::RecordingStatus {
            phase: RecordingPhase::Recording,
            ..
        }
    ));
    // The peer only gets the status frame.
    let frame = fb.next_message().await;
    assert!(matches!(
        frame,
        ServerMessage::RecordingStatus {
            phase: RecordingPhase::Recording,
            ..
        }
    ));

    // Second start is rejected and the state stays put.
    room.recording(b, RecordingCommand::Start).await.unwrap();
    let frame = fb.next_message().await;
    assert!(matches!(
        frame,
        ServerMessage::Error {
            code: ErrorCode::AlreadyRecording,
            ..
        }
    ));

    let state = room.get_state().await.unwrap();
    assert_eq!(state.recording_phase, RecordingPhase::Recording);

    // Stop flows through finalizing back to idle.
    room.recording(a, RecordingCommand::Stop).await.unwrap();
    let frame = fb.next_message().await;
    assert!(matches!(
        frame,
        ServerMessage::RecordingStatus {
            phase: RecordingPhase::Finalizing,
            duration_seconds: Some(_),
            ..
        }
    ));
    let frame = fb.next_message().await;
    assert!(matches!(
        frame,
        ServerMessage::RecordingStatus {
            phase: RecordingPhase::Idle,
            ..
        }
    ));
}

/// Store whose finalize never confirms; the coordinator's bounded wait must
/// force the room back to idle.
struct HangingStore;

#[async_trait]
impl ArtifactStore for HangingStore {
    async fn ensure_namespace(&self, _session_id: SessionId) -> Result<PathBuf, SignalError> {
        Ok(PathBuf::from("hanging"))
    }

    async fn open_artifact(&self, session_id: SessionId) -> Result<ArtifactHandle, SignalError> {
        Ok(ArtifactHandle::new(
            session_id,
            PathBuf::from("hanging/manifest.json"),
            Utc::now(),
        ))
    }

    async fn finalize_artifact(
        &self,
        _handle: Option<ArtifactHandle>,
        _summary: &RecordingSummary,
    ) -> Result<(), SignalError> {
        std::future::pending().await
    }

    async fn save_file(
        &self,
        _session_id: SessionId,
        _filename: &str,
        _data: Bytes,
    ) -> Result<StoredFile, SignalError> {
        Err(SignalError::StorageFault("unsupported".to_string()))
    }

    async fn list_files(&self, _session_id: SessionId) -> Result<Vec<StoredFile>, SignalError> {
        Ok(Vec::new())
    }

    async fn release_namespace(&self, _session_id: SessionId) -> Result<(), SignalError> {
        Ok(())
    }
}

/// When the storage collaborator never confirms finalization, the
/// coordinator logs a fault after the bounded timeout and forces the state
/// back to idle. Paused time auto-advances past the timeout.
#[tokio::test(start_paused = true)]
async fn test_finalize_timeout_forces_idle() {
    let h = harness_with_store(5, Arc::new(HangingStore));
    let (a, _fa) = connect(&h);
    let (b, mut fb) = connect(&h);

    let room = h
        .supervisor
        .join_room(a, "alpha".to_string())
        .await
        .unwrap()
        .room;
    h.supervisor.join_room(b, "alpha".to_string()).await.unwrap();

    room.recording(a, RecordingCommand::Start).await.unwrap();
    room.recording(a, RecordingCommand::Stop).await.unwrap();

    // recording -> finalizing -> (timeout) -> idle
    let mut phases = Vec::new();
    for _ in 0..3 {
        if let ServerMessage::RecordingStatus { phase, .. } = fb.next_message().await {
            phases.push(phase);
        }
    }
    assert_eq!(
        phases,
        vec![
            RecordingPhase::Recording,
            RecordingPhase::Finalizing,
            RecordingPhase::Idle
        ]
    );

    let state = room.get_state().await.unwrap();
    assert_eq!(state.recording_phase, RecordingPhase::Idle);
}

/// Commands during finalization are rejected with `Busy`.
#[tokio::test(start_paused = true)]
async fn test_commands_while_finalizing_are_busy() {
    let h = harness_with_store(5, Arc::new(HangingStore));
    let (a, mut fa) = connect(&h);

    let room = h
        .supervisor
        .join_room(a, "alpha".to_string())
        .await
        .unwrap()
        .room;

    room.recording(a, RecordingCommand::Start).await.unwrap();
    room.recording(a, RecordingCommand::Stop).await.unwrap();

    // Drain start confirmation and the two status frames.
    let _ = fa.next_message().await;
    let _ = fa.next_message().await;
    let _ = fa.next_message().await;

    room.recording(a, RecordingCommand::Start).await.unwrap();
    let frame = fa.next_message().await;
    assert!(matches!(
        frame,
        ServerMessage::Error {
            code: ErrorCode::Busy,
            ..
        }
    ));
}
