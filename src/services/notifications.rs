//! Notification fan-out over the shared notifications queue.
//!
//! All workers publish to one queue; each reader filters for its own
//! user and puts back everything else. At-least-once delivery means
//! the same notification can come around twice, so readers keep a
//! bounded set of recently seen ids.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::models::Notification;
use crate::queue::{QueueError, QueueTransport};

/// Upper bound on remembered notification ids per reader.
const SEEN_CAPACITY: usize = 256;

/// How long one fetch waits for messages to arrive.
const RECEIVE_WAIT: Duration = Duration::from_secs(5);

/// Bounded FIFO set of recently seen ids.
struct SeenIds {
    order: VecDeque<Uuid>,
    set: HashSet<Uuid>,
}

impl SeenIds {
    fn new() -> Self {
        Self {
            order: VecDeque::with_capacity(SEEN_CAPACITY),
            set: HashSet::with_capacity(SEEN_CAPACITY),
        }
    }

    /// Record an id, returning false when it was already present.
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.set.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        true
    }
}

/// Consumer-side view of the notifications queue for one reader.
pub struct NotificationReader {
    transport: Arc<dyn QueueTransport>,
    queue: String,
    seen: Mutex<SeenIds>,
}

impl NotificationReader {
    pub fn new(transport: Arc<dyn QueueTransport>, queue: impl Into<String>) -> Self {
        Self {
            transport,
            queue: queue.into(),
            seen: Mutex::new(SeenIds::new()),
        }
    }

    /// Fetch up to `max_count` pending notifications for one user.
    ///
    /// Messages for other users are abandoned so their readers can pick
    /// them up. Malformed messages are completed so they stop cycling.
    pub async fn fetch_for_user(
        &self,
        user_id: i64,
        max_count: usize,
    ) -> Result<Vec<Notification>, QueueError> {
        let messages = self
            .transport
            .receive(&self.queue, max_count, RECEIVE_WAIT)
            .await?;

        let mut notifications = Vec::new();
        for message in messages {
            let notification: Notification = match serde_json::from_str(&message.body) {
                Ok(notification) => notification,
                Err(err) => {
                    warn!(
                        queue = %self.queue,
                        error = %err,
                        "dropping malformed notification"
                    );
                    self.transport.complete(&message.receipt).await?;
                    continue;
                }
            };

            if notification.user_id != user_id {
                self.transport.abandon(&message.receipt).await?;
                continue;
            }

            self.transport.complete(&message.receipt).await?;
            let fresh = self.seen.lock().await.insert(notification.id);
            if fresh {
                notifications.push(notification);
            }
        }
        Ok(notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use crate::queue::{MemoryQueue, QueueSettings};

    async fn setup() -> (Arc<MemoryQueue>, NotificationReader) {
        let transport = Arc::new(MemoryQueue::new(QueueSettings::default()));
        transport.ensure_queue("notifications").await.unwrap();
        let reader = NotificationReader::new(
            transport.clone() as Arc<dyn QueueTransport>,
            "notifications",
        );
        (transport, reader)
    }

    async fn publish(transport: &MemoryQueue, notification: &Notification) {
        let body = serde_json::to_string(notification).unwrap();
        transport.publish("notifications", &body).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reader_only_sees_its_own_user() {
        let (transport, reader) = setup().await;
        let mine = Notification::new(7, Severity::Info, "a", "m", serde_json::json!({}));
        let theirs = Notification::new(8, Severity::Info, "b", "m", serde_json::json!({}));
        publish(&transport, &mine).await;
        publish(&transport, &theirs).await;

        let fetched = reader.fetch_for_user(7, 10).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, mine.id);

        // The other user's notification went back on the queue.
        let other_reader = NotificationReader::new(
            transport.clone() as Arc<dyn QueueTransport>,
            "notifications",
        );
        let fetched = other_reader.fetch_for_user(8, 10).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, theirs.id);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_deliveries_are_suppressed() {
        let (transport, reader) = setup().await;
        let notification = Notification::new(7, Severity::Info, "a", "m", serde_json::json!({}));
        publish(&transport, &notification).await;
        publish(&transport, &notification).await;

        let fetched = reader.fetch_for_user(7, 10).await.unwrap();
        assert_eq!(fetched.len(), 1);
        let fetched = reader.fetch_for_user(7, 10).await.unwrap();
        assert!(fetched.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_messages_are_dropped_not_recycled() {
        let (transport, reader) = setup().await;
        transport
            .publish("notifications", "{not valid json")
            .await
            .unwrap();

        let fetched = reader.fetch_for_user(7, 10).await.unwrap();
        assert!(fetched.is_empty());
        // Completed, so a second fetch does not see it again.
        let fetched = reader.fetch_for_user(7, 10).await.unwrap();
        assert!(fetched.is_empty());
    }
}
