//! Process-local queue.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{Delivery, Queue, Receipt};
use crate::emit;
use crate::error::QueueError;
use crate::metrics::events::{QueueOperation, QueueRedelivery, QueueRequest};

#[derive(Debug)]
struct Message {
    payload: Bytes,
    attempts: u32,
}

#[derive(Debug, Default)]
struct State {
    visible: VecDeque<Message>,
    leased: HashMap<String, (Message, Instant)>,
}

impl State {
    fn reclaim_expired(&mut self, now: Instant) -> u64 {
        let expired: Vec<String> = self
            .leased
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in &expired {
            if let Some((message, _)) = self.leased.remove(receipt) {
                self.visible.push_back(message);
            }
        }
        expired.len() as u64
    }
}

/// In-memory queue with visibility-timeout leases.
#[derive(Debug)]
pub struct MemoryQueue {
    state: Mutex<State>,
    visibility_timeout: Duration,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            visibility_timeout,
        }
    }

    /// Messages currently leased to a consumer.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.leased.len()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn enqueue(&self, message: Bytes) -> Result<(), QueueError> {
        self.state.lock().await.visible.push_back(Message {
            payload: message,
            attempts: 0,
        });
        emit!(QueueRequest {
            operation: QueueOperation::Enqueue,
            success: true,
        });
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let reclaimed = state.reclaim_expired(now);
        if reclaimed > 0 {
            emit!(QueueRedelivery { count: reclaimed });
        }

        let Some(mut message) = state.visible.pop_front() else {
            return Ok(None);
        };
        message.attempts += 1;

        let receipt = Uuid::now_v7().to_string();
        let delivery = Delivery {
            receipt: Receipt(receipt.clone()),
            payload: message.payload.clone(),
            attempt: message.attempts,
        };
        state
            .leased
            .insert(receipt, (message, now + self.visibility_timeout));

        emit!(QueueRequest {
            operation: QueueOperation::Dequeue,
            success: true,
        });
        Ok(Some(delivery))
    }

    async fn ack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let removed = self.state.lock().await.leased.remove(&receipt.0);
        emit!(QueueRequest {
            operation: QueueOperation::Ack,
            success: removed.is_some(),
        });
        match removed {
            Some(_) => Ok(()),
            None => Err(QueueError::UnknownReceipt {
                receipt: receipt.to_string(),
            }),
        }
    }

    async fn nack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let released = state.leased.remove(&receipt.0);
        emit!(QueueRequest {
            operation: QueueOperation::Nack,
            success: released.is_some(),
        });
        match released {
            Some((message, _)) => {
                state.visible.push_back(message);
                Ok(())
            }
            None => Err(QueueError::UnknownReceipt {
                receipt: receipt.to_string(),
            }),
        }
    }

    async fn pending(&self) -> Result<usize, QueueError> {
        Ok(self.state.lock().await.visible.len())
    }
}
