//! Message bus: the producer-side facade over the queue transport.
//!
//! Owns the queue names and the JSON envelope encoding so the rest of
//! the crate never touches raw queue strings.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::models::{IndexTask, Notification, ProcessingTask};
use crate::queue::{QueueError, QueueTransport};

/// Names of the three well-known queues.
#[derive(Debug, Clone)]
pub struct QueueNames {
    pub processing: String,
    pub indexing: String,
    pub notifications: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            processing: "document-processing".to_string(),
            indexing: "search-indexing".to_string(),
            notifications: "notifications".to_string(),
        }
    }
}

/// Producer facade shared by the worker and the pipeline.
pub struct MessageBus {
    transport: Arc<dyn QueueTransport>,
    queues: QueueNames,
}

impl MessageBus {
    pub fn new(transport: Arc<dyn QueueTransport>, queues: QueueNames) -> Self {
        Self { transport, queues }
    }

    pub fn queue_names(&self) -> &QueueNames {
        &self.queues
    }

    pub fn transport(&self) -> Arc<dyn QueueTransport> {
        Arc::clone(&self.transport)
    }

    /// Provision all well-known queues. Called once at startup.
    pub async fn ensure_queues(&self) -> Result<(), QueueError> {
        self.transport.ensure_queue(&self.queues.processing).await?;
        self.transport.ensure_queue(&self.queues.indexing).await?;
        self.transport
            .ensure_queue(&self.queues.notifications)
            .await?;
        Ok(())
    }

    pub async fn check_connection(&self) -> Result<(), QueueError> {
        self.transport.check_connection().await
    }

    async fn publish_json<T: Serialize>(&self, queue: &str, value: &T) -> Result<(), QueueError> {
        let body = serde_json::to_string(value)
            .map_err(|err| QueueError::Malformed(format!("unserializable message: {err}")))?;
        self.transport.publish(queue, &body).await
    }

    /// Enqueue a processing task, fresh or as a retry attempt.
    pub async fn enqueue_processing(&self, task: &ProcessingTask) -> Result<(), QueueError> {
        self.publish_json(&self.queues.processing, task).await
    }

    /// Enqueue a search index update or removal.
    pub async fn enqueue_index(&self, task: &IndexTask) -> Result<(), QueueError> {
        self.publish_json(&self.queues.indexing, task).await
    }

    /// Publish a notification, propagating transport failures.
    pub async fn publish_notification(
        &self,
        notification: &Notification,
    ) -> Result<(), QueueError> {
        self.publish_json(&self.queues.notifications, notification)
            .await
    }

    /// Fire-and-forget notification. Delivery failures are logged and
    /// swallowed; a status popup is never worth failing a pipeline step.
    pub async fn notify(&self, notification: Notification) {
        if let Err(err) = self.publish_notification(&notification).await {
            warn!(
                user_id = notification.user_id,
                title = %notification.title,
                error = %err,
                "failed to publish notification, dropping"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProcessingKind, Severity};
    use crate::queue::{MemoryQueue, QueueSettings};
    use std::time::Duration;

    async fn bus_with_queues() -> MessageBus {
        let transport = Arc::new(MemoryQueue::new(QueueSettings::default()));
        let bus = MessageBus::new(transport, QueueNames::default());
        bus.ensure_queues().await.unwrap();
        bus
    }

    #[tokio::test]
    async fn processing_task_lands_on_processing_queue() {
        let bus = bus_with_queues().await;
        let task = ProcessingTask::new(42, 7, "user_7/abc.pdf", ProcessingKind::ExtractText);
        bus.enqueue_processing(&task).await.unwrap();

        let messages = bus
            .transport()
            .receive("document-processing", 5, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        let decoded: ProcessingTask = serde_json::from_str(&messages[0].body).unwrap();
        assert_eq!(decoded.document_id, 42);
    }

    #[tokio::test]
    async fn notify_swallows_transport_errors() {
        // No ensure_queues, so the notifications queue does not exist and
        // the publish fails internally.
        let transport = Arc::new(MemoryQueue::new(QueueSettings::default()));
        let bus = MessageBus::new(transport, QueueNames::default());
        bus.notify(Notification::new(
            7,
            Severity::Info,
            "t",
            "m",
            serde_json::json!({}),
        ))
        .await;
    }
}
