//! Metrics definitions for the Room Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `parley_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion: signal kinds,
//! recording phases and failure reasons are closed sets. Room and
//! connection identifiers are never used as labels.

use metrics::{counter, gauge};

/// Record a successful room join.
pub fn record_join() {
    counter!("parley_joins_total").increment(1);
}

/// Record a participant leaving a room.
///
/// `reason` is one of `leave`, `disconnect`, `switch`.
pub fn record_leave(reason: &'static str) {
    counter!("parley_leaves_total", "reason" => reason).increment(1);
}

/// Record a join rejected because the room was full.
pub fn record_room_full() {
    counter!("parley_room_full_rejections_total").increment(1);
}

/// Record a connection rejected at the global ceiling.
pub fn record_admission_rejected() {
    counter!("parley_admission_rejections_total").increment(1);
}

/// Record a relayed negotiation signal.
///
/// `kind` is one of `offer`, `answer`, `candidate`.
pub fn record_relay(kind: &'static str) {
    counter!("parley_relayed_signals_total", "kind" => kind).increment(1);
}

/// Record a failed delivery.
///
/// `reason` is one of `gone`, `congested`, `unknown_target`.
pub fn record_relay_failure(reason: &'static str) {
    counter!("parley_relay_failures_total", "reason" => reason).increment(1);
}

/// Record a recording state transition.
///
/// `phase` is the phase being entered: `recording`, `finalizing`, `idle`.
pub fn record_recording_transition(phase: &'static str) {
    counter!("parley_recording_transitions_total", "phase" => phase).increment(1);
}

/// Record a storage collaborator failure.
///
/// `operation` is one of `open`, `finalize`, `save`, `list`, `namespace`.
pub fn record_storage_fault(operation: &'static str) {
    counter!("parley_storage_faults_total", "operation" => operation).increment(1);
}

/// Record an accepted media upload.
pub fn record_upload(bytes: u64) {
    counter!("parley_uploads_total").increment(1);
    counter!("parley_uploaded_bytes_total").increment(bytes);
}

/// Update the open connection gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_open_connections(count: usize) {
    gauge!("parley_open_connections").set(count as f64);
}

/// Update the live room gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_rooms(count: usize) {
    gauge!("parley_active_rooms").set(count as f64);
}
