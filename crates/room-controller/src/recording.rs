//! Per-room recording state machine.
//!
//! Phases: `Idle -> Recording -> Finalizing -> Idle`. The machine itself is
//! synchronous and owned by the room actor; storage side effects (opening
//! and finalizing the artifact) run in spawned tasks that report back into
//! the room mailbox, so room critical sections never wait on the
//! collaborator.

use crate::errors::SignalError;
use crate::storage::{ArtifactHandle, RecordingSummary};

use chrono::{DateTime, Utc};
use signal_protocol::{ConnectionId, RecordingPhase, SessionId};

/// One active recording of a room.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    /// Session namespace the artifact belongs to.
    pub session_id: SessionId,
    /// Room being recorded.
    pub room_id: String,
    /// Participant that issued the start command.
    pub initiated_by: ConnectionId,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
}

enum State {
    Idle,
    Recording {
        session: RecordingSession,
        artifact: Option<ArtifactHandle>,
    },
    Finalizing {
        session: RecordingSession,
    },
}

/// Recording coordinator state for one room.
pub struct Recorder {
    room_id: String,
    session_id: SessionId,
    state: State,
}

impl Recorder {
    /// Create an idle recorder bound to the room's session namespace.
    #[must_use]
    pub fn new(room_id: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            room_id: room_id.into(),
            session_id,
            state: State::Idle,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> RecordingPhase {
        match self.state {
            State::Idle => RecordingPhase::Idle,
            State::Recording { .. } => RecordingPhase::Recording,
            State::Finalizing { .. } => RecordingPhase::Finalizing,
        }
    }

    /// `Idle -> Recording` on a start command.
    ///
    /// Fails with `AlreadyRecording` while recording and `Busy` while the
    /// previous recording is still finalizing; state is unchanged on error.
    pub fn start(&mut self, initiated_by: ConnectionId) -> Result<RecordingSession, SignalError> {
        match self.state {
            State::Idle => {
                let session = RecordingSession {
                    session_id: self.session_id,
                    room_id: self.room_id.clone(),
                    initiated_by,
                    started_at: Utc::now(),
                };
                self.state = State::Recording {
                    session: session.clone(),
                    artifact: None,
                };
                Ok(session)
            }
            State::Recording { .. } => Err(SignalError::AlreadyRecording),
            State::Finalizing { .. } => Err(SignalError::Busy("finalizing".to_string())),
        }
    }

    /// Attach the artifact handle once the storage open completes.
    ///
    /// Returns the handle back when the recording is no longer active (the
    /// caller should pass it straight to finalization).
    pub fn attach_artifact(&mut self, handle: ArtifactHandle) -> Option<ArtifactHandle> {
        match &mut self.state {
            State::Recording { artifact, .. } => {
                *artifact = Some(handle);
                None
            }
            _ => Some(handle),
        }
    }

    /// `Recording -> Finalizing` on a stop command or on the room draining.
    ///
    /// Returns the finalization summary and the artifact handle (when the
    /// open had completed). Fails with `Busy` in any other phase.
    pub fn stop(&mut self) -> Result<(RecordingSummary, Option<ArtifactHandle>), SignalError> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Recording { session, artifact } => {
                let ended_at = Utc::now();
                let duration_seconds =
                    (ended_at - session.started_at).num_milliseconds() as f64 / 1000.0;
                let summary = RecordingSummary {
                    session_id: session.session_id,
                    room_id: session.room_id.clone(),
                    started_at: session.started_at,
                    ended_at,
                    duration_seconds,
                };
                self.state = State::Finalizing { session };
                Ok((summary, artifact))
            }
            previous => {
                let phase = match &previous {
                    State::Idle => "idle",
                    State::Finalizing { .. } => "finalizing",
                    State::Recording { .. } => "recording",
                };
                self.state = previous;
                Err(SignalError::Busy(phase.to_string()))
            }
        }
    }

    /// `Finalizing -> Idle` once the storage collaborator confirms closure
    /// (or the bounded wait expires). Returns false when not finalizing.
    pub fn finalized(&mut self) -> bool {
        match self.state {
            State::Finalizing { .. } => {
                self.state = State::Idle;
                true
            }
            _ => false,
        }
    }

    /// Whether a recording is currently in progress.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        matches!(self.state, State::Recording { .. })
    }

    /// The participant that started the in-flight recording, if any.
    #[must_use]
    pub fn initiated_by(&self) -> Option<ConnectionId> {
        match &self.state {
            State::Recording { session, .. } | State::Finalizing { session } => {
                Some(session.initiated_by)
            }
            State::Idle => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn test_recorder() -> Recorder {
        Recorder::new("alpha", SessionId::new())
    }

    #[test]
    fn test_start_from_idle() {
        let mut recorder = test_recorder();
        let initiator = ConnectionId::new();

        let session = recorder.start(initiator).unwrap();
        assert_eq!(session.room_id, "alpha");
        assert_eq!(session.initiated_by, initiator);
        assert_eq!(recorder.phase(), RecordingPhase::Recording);
    }

    #[test]
    fn test_start_while_recording_fails_and_keeps_state() {
        let mut recorder = test_recorder();
        recorder.start(ConnectionId::new()).unwrap();

        let result = recorder.start(ConnectionId::new());
        assert!(matches!(result, Err(SignalError::AlreadyRecording)));
        assert_eq!(recorder.phase(), RecordingPhase::Recording);
    }

    #[test]
    fn test_stop_while_idle_is_busy() {
        let mut recorder = test_recorder();
        assert!(matches!(recorder.stop(), Err(SignalError::Busy(_))));
        assert_eq!(recorder.phase(), RecordingPhase::Idle);
    }

    #[test]
    fn test_full_cycle() {
        let mut recorder = test_recorder();
        let initiator = ConnectionId::new();

        recorder.start(initiator).unwrap();
        let (summary, artifact) = recorder.stop().unwrap();
        assert_eq!(summary.room_id, "alpha");
        assert!(artifact.is_none());
        assert_eq!(recorder.phase(), RecordingPhase::Finalizing);
        assert_eq!(recorder.initiated_by(), Some(initiator));

        assert!(recorder.finalized());
        assert_eq!(recorder.phase(), RecordingPhase::Idle);
        assert_eq!(recorder.initiated_by(), None);
    }

    #[test]
    fn test_commands_while_finalizing_are_busy() {
        let mut recorder = test_recorder();
        recorder.start(ConnectionId::new()).unwrap();
        recorder.stop().unwrap();

        assert!(matches!(
            recorder.start(ConnectionId::new()),
            Err(SignalError::Busy(_))
        ));
        assert!(matches!(recorder.stop(), Err(SignalError::Busy(_))));
        assert_eq!(recorder.phase(), RecordingPhase::Finalizing);
    }

    #[test]
    fn test_finalized_outside_finalizing_is_noop() {
        let mut recorder = test_recorder();
        assert!(!recorder.finalized());

        recorder.start(ConnectionId::new()).unwrap();
        assert!(!recorder.finalized());
        assert_eq!(recorder.phase(), RecordingPhase::Recording);
    }

    #[test]
    fn test_restart_after_finalize() {
        let mut recorder = test_recorder();
        recorder.start(ConnectionId::new()).unwrap();
        recorder.stop().unwrap();
        recorder.finalized();

        assert!(recorder.start(ConnectionId::new()).is_ok());
        assert_eq!(recorder.phase(), RecordingPhase::Recording);
    }
}
