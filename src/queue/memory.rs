//! In-process queue transport with visibility-timeout semantics.
//!
//! Backs single-node deployments and tests. Mirrors the behavior the
//! worker relies on from a hosted broker: per-message locks, delivery
//! counting, and TTL expiry. Uses the tokio clock so time-based behavior
//! is testable with a paused runtime.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{QueueError, QueueMessage, QueueSettings, QueueTransport, ReceiptHandle};

/// Sleep between polls while a bounded-wait receive finds nothing.
const RECEIVE_POLL_SLEEP: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
struct StoredMessage {
    body: String,
    enqueued_at: Instant,
    delivery_count: u32,
}

struct InFlight {
    message: StoredMessage,
    locked_at: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    in_flight: HashMap<u64, InFlight>,
}

/// In-memory queue transport.
pub struct MemoryQueue {
    settings: QueueSettings,
    next_receipt: AtomicU64,
    queues: Mutex<HashMap<String, QueueState>>,
}

impl MemoryQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            next_receipt: AtomicU64::new(1),
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Return expired locks to the ready list and expire stale messages.
    fn reclaim(&self, queue: &str, state: &mut QueueState, now: Instant) {
        let expired: Vec<u64> = state
            .in_flight
            .iter()
            .filter(|(_, flight)| {
                now.duration_since(flight.locked_at) >= self.settings.lock_duration
            })
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(flight) = state.in_flight.remove(&id) {
                debug!(queue, receipt = id, "message lock expired; redelivering");
                self.requeue(queue, state, flight.message);
            }
        }

        let ttl = self.settings.message_ttl;
        let before = state.ready.len();
        state
            .ready
            .retain(|message| now.duration_since(message.enqueued_at) < ttl);
        let dropped = before - state.ready.len();
        if dropped > 0 {
            warn!(queue, dropped, "expired messages past their ttl");
        }
    }

    /// Make a message available again, unless it has hit the delivery cap.
    fn requeue(&self, queue: &str, state: &mut QueueState, message: StoredMessage) {
        if message.delivery_count >= self.settings.max_delivery_count {
            warn!(
                queue,
                deliveries = message.delivery_count,
                "dropping message past max delivery count"
            );
            return;
        }
        state.ready.push_back(message);
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn ensure_queue(&self, queue: &str) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, body: &str) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::Malformed(format!("unknown queue: {queue}")))?;
        state.ready.push_back(StoredMessage {
            body: body.to_string(),
            enqueued_at: Instant::now(),
            delivery_count: 0,
        });
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = Instant::now() + max_wait;
        loop {
            {
                let mut queues = self.queues.lock().await;
                let state = queues
                    .get_mut(queue)
                    .ok_or_else(|| QueueError::Malformed(format!("unknown queue: {queue}")))?;
                let now = Instant::now();
                self.reclaim(queue, state, now);

                if !state.ready.is_empty() {
                    let mut received = Vec::new();
                    while received.len() < max_count {
                        let Some(mut message) = state.ready.pop_front() else {
                            break;
                        };
                        message.delivery_count += 1;
                        let id = self.next_receipt.fetch_add(1, Ordering::Relaxed);
                        received.push(QueueMessage {
                            body: message.body.clone(),
                            receipt: ReceiptHandle {
                                queue: queue.to_string(),
                                id,
                            },
                            delivery_count: message.delivery_count,
                        });
                        state.in_flight.insert(
                            id,
                            InFlight {
                                message,
                                locked_at: now,
                            },
                        );
                    }
                    return Ok(received);
                }
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(RECEIVE_POLL_SLEEP).await;
        }
    }

    async fn complete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(&receipt.queue)
            .ok_or_else(|| QueueError::Malformed(format!("unknown queue: {}", receipt.queue)))?;
        state.in_flight.remove(&receipt.id).ok_or_else(|| {
            QueueError::Malformed(format!(
                "receipt {} expired or already settled",
                receipt.id
            ))
        })?;
        Ok(())
    }

    async fn abandon(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(&receipt.queue)
            .ok_or_else(|| QueueError::Malformed(format!("unknown queue: {}", receipt.queue)))?;
        let flight = state.in_flight.remove(&receipt.id).ok_or_else(|| {
            QueueError::Malformed(format!(
                "receipt {} expired or already settled",
                receipt.id
            ))
        })?;
        self.requeue(&receipt.queue, state, flight.message);
        Ok(())
    }

    async fn check_connection(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
