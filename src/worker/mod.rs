//! Queue polling worker.
//!
//! Runs one poller per work queue plus a periodic connectivity check,
//! all cancellable through a shared shutdown signal. Pollers receive in
//! batches, dispatch each message to the pipeline, and settle messages
//! according to the returned disposition.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::models::{IndexTask, ProcessingTask};
use crate::queue::{QueueMessage, QueueTransport};
use crate::services::bus::MessageBus;
use crate::services::pipeline::{Disposition, DocumentPipeline};

/// Tunables for the polling loops.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Messages fetched per receive call.
    pub batch_size: usize,
    /// How long one receive call blocks waiting for messages.
    pub receive_wait: Duration,
    /// Pause between polls of the processing queue after an empty batch.
    pub processing_poll_interval: Duration,
    /// Pause between polls of the indexing queue after an empty batch.
    pub indexing_poll_interval: Duration,
    /// Pause after a transport error before polling again.
    pub error_backoff: Duration,
    /// Interval between connectivity checks.
    pub health_interval: Duration,
    /// How long shutdown waits for in-flight handlers to finish.
    pub shutdown_grace: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            batch_size: 5,
            receive_wait: Duration::from_secs(10),
            processing_poll_interval: Duration::from_secs(5),
            indexing_poll_interval: Duration::from_secs(3),
            error_backoff: Duration::from_secs(10),
            health_interval: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// The long-running worker process.
pub struct DocumentWorker {
    transport: Arc<dyn QueueTransport>,
    pipeline: Arc<DocumentPipeline>,
    bus: Arc<MessageBus>,
    options: WorkerOptions,
}

impl DocumentWorker {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        pipeline: Arc<DocumentPipeline>,
        bus: Arc<MessageBus>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            transport,
            pipeline,
            bus,
            options,
        }
    }

    /// Provision queues and verify connectivity. Must succeed before
    /// `run` is called.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        self.bus
            .ensure_queues()
            .await
            .context("failed to provision queues")?;
        self.bus
            .check_connection()
            .await
            .context("queue transport unreachable")?;
        info!("worker initialized");
        Ok(())
    }

    /// Run until the shutdown signal flips, then drain in-flight work
    /// within the grace period.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let queues = self.bus.queue_names().clone();
        let mut tasks = Vec::new();

        {
            let pipeline = Arc::clone(&self.pipeline);
            tasks.push(tokio::spawn(Self::run_poller(
                Arc::clone(&self.transport),
                Arc::clone(&self.bus),
                queues.processing.clone(),
                self.options.batch_size,
                self.options.receive_wait,
                self.options.processing_poll_interval,
                self.options.error_backoff,
                shutdown.clone(),
                move |task: ProcessingTask| {
                    let pipeline = Arc::clone(&pipeline);
                    async move { pipeline.handle_processing(task).await }
                },
            )));
        }

        {
            let pipeline = Arc::clone(&self.pipeline);
            tasks.push(tokio::spawn(Self::run_poller(
                Arc::clone(&self.transport),
                Arc::clone(&self.bus),
                queues.indexing.clone(),
                self.options.batch_size,
                self.options.receive_wait,
                self.options.indexing_poll_interval,
                self.options.error_backoff,
                shutdown.clone(),
                move |task: IndexTask| {
                    let pipeline = Arc::clone(&pipeline);
                    async move { pipeline.handle_indexing(task).await }
                },
            )));
        }

        tasks.push(tokio::spawn(Self::run_health_check(
            Arc::clone(&self.bus),
            self.options.health_interval,
            shutdown.clone(),
        )));

        info!("worker running");
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        info!("shutdown requested; draining in-flight work");
        let drained = timeout(self.options.shutdown_grace, join_all(tasks.iter_mut())).await;
        if drained.is_err() {
            warn!(
                grace_secs = self.options.shutdown_grace.as_secs(),
                "in-flight work did not finish within the grace period; aborting"
            );
            for task in &tasks {
                task.abort();
            }
        }
        info!("worker stopped");
    }

    /// Poll one queue, dispatching each received message to `handler`.
    #[allow(clippy::too_many_arguments)]
    async fn run_poller<T, F, Fut>(
        transport: Arc<dyn QueueTransport>,
        bus: Arc<MessageBus>,
        queue: String,
        batch_size: usize,
        receive_wait: Duration,
        poll_interval: Duration,
        error_backoff: Duration,
        mut shutdown: watch::Receiver<bool>,
        handler: F,
    ) where
        T: DeserializeOwned,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Disposition>,
    {
        debug!(queue, "poller started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                _ = shutdown.changed() => break,
                result = transport.receive(&queue, batch_size, receive_wait) => result,
            };

            match received {
                Ok(messages) if messages.is_empty() => {
                    if !sleep_or_shutdown(poll_interval, &mut shutdown).await {
                        break;
                    }
                }
                Ok(messages) => {
                    for message in messages {
                        Self::dispatch_message(&transport, &bus, &queue, message, &handler).await;
                    }
                }
                Err(err) => {
                    warn!(queue, error = %err, "receive failed; backing off");
                    if !sleep_or_shutdown(error_backoff, &mut shutdown).await {
                        break;
                    }
                }
            }
        }
        debug!(queue, "poller stopped");
    }

    /// Decode one message, run the handler, and settle per disposition.
    ///
    /// Undecodable messages are completed so they stop cycling through
    /// redelivery.
    async fn dispatch_message<T, F, Fut>(
        transport: &Arc<dyn QueueTransport>,
        bus: &Arc<MessageBus>,
        queue: &str,
        message: QueueMessage,
        handler: &F,
    ) where
        T: DeserializeOwned,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Disposition>,
    {
        let task: T = match serde_json::from_str(&message.body) {
            Ok(task) => task,
            Err(err) => {
                warn!(queue, error = %err, "dropping undecodable message");
                if let Err(err) = transport.complete(&message.receipt).await {
                    warn!(queue, error = %err, "failed to drop undecodable message");
                }
                return;
            }
        };

        match handler(task).await {
            Disposition::Complete => {
                if let Err(err) = transport.complete(&message.receipt).await {
                    warn!(queue, error = %err, "failed to complete message");
                }
            }
            Disposition::CompleteThenPublish(retry) => {
                // Complete before republishing so at most one envelope
                // per document is ever in flight. If completion fails the
                // original will be redelivered, so skip the publish.
                match transport.complete(&message.receipt).await {
                    Ok(()) => {
                        if let Err(err) = bus.enqueue_processing(&retry).await {
                            error!(
                                queue,
                                document_id = retry.document_id,
                                error = %err,
                                "failed to publish retry; task lost"
                            );
                        }
                    }
                    Err(err) => {
                        warn!(queue, error = %err, "failed to complete before retry publish");
                    }
                }
            }
            Disposition::Abandon => {
                if let Err(err) = transport.abandon(&message.receipt).await {
                    warn!(queue, error = %err, "failed to abandon message");
                }
            }
        }
    }

    /// Periodic connectivity probe. Failures are logged, never fatal;
    /// the pollers keep retrying with their own backoff.
    async fn run_health_check(
        bus: Arc<MessageBus>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if !sleep_or_shutdown(interval, &mut shutdown).await {
                break;
            }
            match bus.check_connection().await {
                Ok(()) => debug!("queue connection healthy"),
                Err(err) => warn!(error = %err, "queue connectivity check failed"),
            }
        }
    }
}

/// Sleep for `duration`, returning false if shutdown fires first.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.changed() => false,
    }
}
