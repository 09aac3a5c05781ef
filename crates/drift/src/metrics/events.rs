//! Internal events for drift metrics emission.
//!
//! Buffer and handoff metrics carry `destination` and `table` labels so
//! each tenant's backlog can be watched on its own.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

use crate::buffer::{IngestKey, RotationReason};

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    fn emit(self);
}

// ============================================================================
// Ingest events
// ============================================================================

/// Documents accepted or rejected by the flattener.
pub struct DocumentsFlattened {
    pub strategy: &'static str,
    pub accepted: u64,
    pub rejected: u64,
}

impl InternalEvent for DocumentsFlattened {
    fn emit(self) {
        trace!(
            strategy = self.strategy,
            accepted = self.accepted,
            rejected = self.rejected,
            "Documents flattened"
        );
        counter!("drift_documents_total", "strategy" => self.strategy, "status" => "accepted")
            .increment(self.accepted);
        counter!("drift_documents_total", "strategy" => self.strategy, "status" => "rejected")
            .increment(self.rejected);
    }
}

/// A row appended to a buffer file.
pub struct RowBuffered<'a> {
    pub key: &'a IngestKey,
    pub bytes: u64,
}

impl InternalEvent for RowBuffered<'_> {
    fn emit(self) {
        trace!(target_key = %self.key, bytes = self.bytes, "Row buffered");
        let labels = self.key.labels();
        counter!("drift_rows_buffered_total", labels.clone()).increment(1);
        counter!("drift_bytes_buffered_total", labels).increment(self.bytes);
    }
}

/// Why a write was refused.
#[derive(Debug, Clone, Copy)]
pub enum RejectReason {
    DiskFull,
    RowTooLarge,
    ShuttingDown,
    Io,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::DiskFull => "disk_full",
            RejectReason::RowTooLarge => "row_too_large",
            RejectReason::ShuttingDown => "shutting_down",
            RejectReason::Io => "io",
        }
    }
}

/// A write refused by the buffer.
pub struct WriteRejected {
    pub reason: RejectReason,
}

impl InternalEvent for WriteRejected {
    fn emit(self) {
        trace!(reason = self.reason.as_str(), "Write rejected");
        counter!("drift_writes_rejected_total", "reason" => self.reason.as_str()).increment(1);
    }
}

// ============================================================================
// Rotation events
// ============================================================================

/// A non-empty buffer file closed and queued for handoff.
pub struct FileRotated<'a> {
    pub key: &'a IngestKey,
    pub reason: RotationReason,
    pub rows: u64,
    pub bytes: u64,
}

impl InternalEvent for FileRotated<'_> {
    fn emit(self) {
        trace!(
            target_key = %self.key,
            reason = self.reason.as_str(),
            rows = self.rows,
            bytes = self.bytes,
            "File rotated"
        );
        counter!(
            "drift_files_rotated_total",
            "destination" => self.key.destination_id().to_string(),
            "table" => self.key.table().to_string(),
            "reason" => self.reason.as_str()
        )
        .increment(1);
        histogram!("drift_rotated_file_rows").record(self.rows as f64);
        histogram!("drift_rotated_file_bytes").record(self.bytes as f64);
    }
}

/// Rotation hit an I/O error. The file is kept.
pub struct RotationFailed;

impl InternalEvent for RotationFailed {
    fn emit(self) {
        trace!("Rotation failed");
        counter!("drift_rotation_failures_total").increment(1);
    }
}

/// Buffer files currently open for writing.
pub struct OpenFiles {
    pub count: usize,
}

impl InternalEvent for OpenFiles {
    fn emit(self) {
        trace!(count = self.count, "Open buffer files");
        gauge!("drift_open_buffer_files").set(self.count as f64);
    }
}

/// Closed files waiting for the handoff channel to accept them.
pub struct ParkedFiles {
    pub count: usize,
}

impl InternalEvent for ParkedFiles {
    fn emit(self) {
        trace!(count = self.count, "Parked closed files");
        gauge!("drift_parked_closed_files").set(self.count as f64);
    }
}

/// The sweep skipped a key whose lock was held.
pub struct SweepSkipped;

impl InternalEvent for SweepSkipped {
    fn emit(self) {
        trace!("Sweep skipped busy key");
        counter!("drift_sweep_skipped_total").increment(1);
    }
}

/// Files left behind by an earlier process and queued again at startup.
pub struct FilesRecovered {
    pub count: u64,
}

impl InternalEvent for FilesRecovered {
    fn emit(self) {
        trace!(count = self.count, "Files recovered");
        counter!("drift_files_recovered_total").increment(self.count);
    }
}

// ============================================================================
// Handoff events
// ============================================================================

/// A closed file was uploaded, enqueued and removed locally.
pub struct HandoffCompleted<'a> {
    pub key: &'a IngestKey,
    pub bytes: u64,
    pub attempts: u32,
    pub duration: Duration,
}

impl InternalEvent for HandoffCompleted<'_> {
    fn emit(self) {
        trace!(
            target_key = %self.key,
            bytes = self.bytes,
            attempts = self.attempts,
            duration_ms = self.duration.as_millis(),
            "Handoff completed"
        );
        let labels = self.key.labels();
        counter!("drift_handoffs_completed_total", labels.clone()).increment(1);
        counter!("drift_handoff_bytes_total", labels).increment(self.bytes);
        histogram!("drift_handoff_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// One handoff attempt failed and will be retried.
pub struct HandoffRetried {
    pub stage: &'static str,
}

impl InternalEvent for HandoffRetried {
    fn emit(self) {
        trace!(stage = self.stage, "Handoff retried");
        counter!("drift_handoff_retries_total", "stage" => self.stage).increment(1);
    }
}

/// Shutdown deadline passed; the file stays on disk for recovery.
pub struct HandoffAbandoned;

impl InternalEvent for HandoffAbandoned {
    fn emit(self) {
        trace!("Handoff abandoned");
        counter!("drift_handoffs_abandoned_total").increment(1);
    }
}

/// Handoffs currently in progress.
pub struct ActiveHandoffs {
    pub count: usize,
}

impl InternalEvent for ActiveHandoffs {
    fn emit(self) {
        trace!(count = self.count, "Active handoffs");
        gauge!("drift_active_handoffs").set(self.count as f64);
    }
}
