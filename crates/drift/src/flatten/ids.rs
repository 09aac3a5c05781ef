//! Id generators injected into the flatteners.
//!
//! Production code uses time-ordered ids; tests swap in [`SequentialIds`] to
//! make flattening output fully deterministic.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Source of `___document_id` values for vertical flattening.
pub trait DocumentIds: Send + Sync + Debug {
    fn next_document_id(&self) -> String;
}

/// Source of numeric row ids for multi-table flattening.
pub trait RowIds: Send + Sync + Debug {
    fn next_row_id(&self) -> i64;
}

/// UUID v7 document ids (time ordered, globally unique).
#[derive(Debug, Default)]
pub struct UuidIds;

impl DocumentIds for UuidIds {
    fn next_document_id(&self) -> String {
        Uuid::now_v7().to_string()
    }
}

/// 2020-01-01T00:00:00Z in milliseconds.
const SNOWFLAKE_EPOCH_MS: u64 = 1_577_836_800_000;
const SEQUENCE_BITS: u64 = 12;
const NODE_BITS: u64 = 10;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Snowflake-style ids: 41 bits of milliseconds, 10 bits of node, 12 bits of sequence.
///
/// Ids from one generator are strictly increasing. When more than 4096 ids are
/// requested within a millisecond the generator runs ahead of the clock.
#[derive(Debug)]
pub struct SnowflakeIds {
    node: u64,
    /// `last_ms << SEQUENCE_BITS | sequence`
    state: AtomicU64,
}

impl SnowflakeIds {
    pub fn new(node: u16) -> Self {
        Self {
            node: u64::from(node) & ((1 << NODE_BITS) - 1),
            state: AtomicU64::new(0),
        }
    }

    /// Generator with a random node id.
    pub fn random_node() -> Self {
        Self::new(rand::random::<u16>())
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
            .saturating_sub(SNOWFLAKE_EPOCH_MS)
    }
}

impl RowIds for SnowflakeIds {
    fn next_row_id(&self) -> i64 {
        let now = Self::now_ms();
        let mut prev = self.state.load(Ordering::Acquire);
        loop {
            let last_ms = prev >> SEQUENCE_BITS;
            let sequence = prev & SEQUENCE_MASK;
            let next = if now > last_ms {
                now << SEQUENCE_BITS
            } else if sequence < SEQUENCE_MASK {
                prev + 1
            } else {
                (last_ms + 1) << SEQUENCE_BITS
            };

            match self
                .state
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    let ms = next >> SEQUENCE_BITS;
                    let sequence = next & SEQUENCE_MASK;
                    let id = (ms << (NODE_BITS + SEQUENCE_BITS))
                        | (self.node << SEQUENCE_BITS)
                        | sequence;
                    return (id & (i64::MAX as u64)) as i64;
                }
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Deterministic counter, starting at 1.
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicI64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentIds for SequentialIds {
    fn next_document_id(&self) -> String {
        format!("doc-{:06}", self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl RowIds for SequentialIds {
    fn next_row_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
