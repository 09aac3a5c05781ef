//! Pointer message exchanged between the handoff producer and consumer.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::error::{DecodeSnafu, EncodeSnafu, MessageError};

/// Tells a consumer which blob holds a batch for which destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerMessage {
    pub destination_id: String,
    pub table: String,
    pub blob_key: String,
    /// Rows in the batch, as counted by the producer.
    #[serde(default)]
    pub rows: u64,
}

impl PointerMessage {
    pub fn encode(&self) -> Result<Bytes, MessageError> {
        serde_json::to_vec(self).map(Bytes::from).context(EncodeSnafu)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        serde_json::from_slice(payload).context(DecodeSnafu)
    }
}
