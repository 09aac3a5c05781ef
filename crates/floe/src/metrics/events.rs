//! Internal events for floe metrics emission.

use metrics::{Label, counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

use crate::destination::InsertStats;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    fn emit(self);
}

fn labels(destination: &str, table: &str) -> Vec<Label> {
    vec![
        Label::new("destination", destination.to_string()),
        Label::new("table", table.to_string()),
    ]
}

/// A batch inserted and its message acked.
pub struct BatchLoaded<'a> {
    pub destination: &'a str,
    pub table: &'a str,
    pub stats: InsertStats,
    pub duration: Duration,
}

impl InternalEvent for BatchLoaded<'_> {
    fn emit(self) {
        trace!(
            destination = self.destination,
            table = self.table,
            rows = self.stats.rows,
            duration_ms = self.duration.as_millis(),
            "Batch loaded"
        );
        let labels = labels(self.destination, self.table);
        counter!("floe_batches_loaded_total", labels.clone()).increment(1);
        counter!("floe_rows_inserted_total", labels.clone()).increment(self.stats.rows);
        counter!("floe_lines_skipped_total", labels.clone()).increment(self.stats.skipped_lines);
        counter!("floe_values_nulled_total", labels).increment(self.stats.nulled_values);
        histogram!("floe_batch_load_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Columns added to a destination table.
pub struct ColumnsAdded<'a> {
    pub destination: &'a str,
    pub table: &'a str,
    pub count: usize,
}

impl InternalEvent for ColumnsAdded<'_> {
    fn emit(self) {
        trace!(
            destination = self.destination,
            table = self.table,
            count = self.count,
            "Columns added"
        );
        counter!(
            "floe_columns_added_total",
            labels(self.destination, self.table)
        )
        .increment(self.count as u64);
    }
}

/// Batch columns whose inferred type differs from the table's.
pub struct TypeConflicts<'a> {
    pub destination: &'a str,
    pub table: &'a str,
    pub count: usize,
}

impl InternalEvent for TypeConflicts<'_> {
    fn emit(self) {
        trace!(
            destination = self.destination,
            table = self.table,
            count = self.count,
            "Type conflicts"
        );
        counter!(
            "floe_type_conflicts_total",
            labels(self.destination, self.table)
        )
        .increment(self.count as u64);
    }
}

/// A message failed and was released for redelivery.
pub struct ConsumerFailure {
    pub stage: &'static str,
}

impl InternalEvent for ConsumerFailure {
    fn emit(self) {
        trace!(stage = self.stage, "Consumer failure");
        counter!("floe_consumer_failures_total", "stage" => self.stage).increment(1);
    }
}

/// A message that can never succeed was acked and dropped.
pub struct PoisonMessage {
    pub stage: &'static str,
}

impl InternalEvent for PoisonMessage {
    fn emit(self) {
        trace!(stage = self.stage, "Poison message dropped");
        counter!("floe_poison_messages_total", "stage" => self.stage).increment(1);
    }
}

/// Messages waiting in the queue.
pub struct QueueDepth {
    pub pending: usize,
}

impl InternalEvent for QueueDepth {
    fn emit(self) {
        trace!(pending = self.pending, "Queue depth");
        gauge!("floe_queue_pending_messages").set(self.pending as f64);
    }
}

/// A worker paused because the scratch volume is short of space.
pub struct DiskLow {
    pub available: u64,
    pub required: u64,
}

impl InternalEvent for DiskLow {
    fn emit(self) {
        trace!(
            available = self.available,
            required = self.required,
            "Scratch disk low"
        );
        counter!("floe_disk_low_total").increment(1);
    }
}

/// Workers currently processing a message.
pub struct ActiveWorkers {
    pub count: usize,
}

impl InternalEvent for ActiveWorkers {
    fn emit(self) {
        trace!(count = self.count, "Active workers");
        gauge!("floe_active_workers").set(self.count as f64);
    }
}
