//! Worker configuration from flags and environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::queue::QueueSettings;
use crate::services::bus::QueueNames;
use crate::worker::WorkerOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Document processing worker.
#[derive(Debug, Parser)]
#[command(name = "docflow", version, about = "Document processing worker")]
pub struct WorkerConfig {
    /// Queue transport url (memory:// or amqp://).
    #[arg(long, env = "QUEUE_URL")]
    pub queue_url: String,

    /// Directory for databases and blob storage.
    #[arg(long, env = "DOCFLOW_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Name of the document processing queue.
    #[arg(long, env = "DOCFLOW_PROCESSING_QUEUE", default_value = "document-processing")]
    pub processing_queue: String,

    /// Name of the search indexing queue.
    #[arg(long, env = "DOCFLOW_INDEXING_QUEUE", default_value = "search-indexing")]
    pub indexing_queue: String,

    /// Name of the shared notifications queue.
    #[arg(long, env = "DOCFLOW_NOTIFICATIONS_QUEUE", default_value = "notifications")]
    pub notifications_queue: String,

    /// Application-level retry attempts per document.
    #[arg(long, env = "DOCFLOW_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Seconds a received message stays locked before redelivery.
    #[arg(long, env = "DOCFLOW_LOCK_DURATION_SECS", default_value_t = 300)]
    pub lock_duration_secs: u64,

    /// Deliveries after which the transport drops a message.
    #[arg(long, env = "DOCFLOW_MAX_DELIVERY_COUNT", default_value_t = 10)]
    pub max_delivery_count: u32,

    /// Days before unconsumed messages expire.
    #[arg(long, env = "DOCFLOW_MESSAGE_TTL_DAYS", default_value_t = 14)]
    pub message_ttl_days: u64,

    /// Messages fetched per receive call.
    #[arg(long, env = "DOCFLOW_POLL_BATCH_SIZE", default_value_t = 5)]
    pub poll_batch_size: usize,

    /// Seconds one receive call blocks waiting for messages.
    #[arg(long, env = "DOCFLOW_RECEIVE_WAIT_SECS", default_value_t = 10)]
    pub receive_wait_secs: u64,

    /// Seconds between processing queue polls after an empty batch.
    #[arg(long, env = "DOCFLOW_PROCESSING_POLL_SECS", default_value_t = 5)]
    pub processing_poll_secs: u64,

    /// Seconds between indexing queue polls after an empty batch.
    #[arg(long, env = "DOCFLOW_INDEXING_POLL_SECS", default_value_t = 3)]
    pub indexing_poll_secs: u64,

    /// Seconds to back off after a transport error.
    #[arg(long, env = "DOCFLOW_ERROR_BACKOFF_SECS", default_value_t = 10)]
    pub error_backoff_secs: u64,

    /// Seconds between queue connectivity checks.
    #[arg(long, env = "DOCFLOW_HEALTH_CHECK_SECS", default_value_t = 60)]
    pub health_check_secs: u64,

    /// Seconds shutdown waits for in-flight work.
    #[arg(long, env = "DOCFLOW_SHUTDOWN_GRACE_SECS", default_value_t = 30)]
    pub shutdown_grace_secs: u64,

    /// Enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_url.is_empty() {
            return Err(ConfigError::Missing("queue_url"));
        }
        if self.poll_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "poll_batch_size must be at least 1".to_string(),
            ));
        }
        if self.lock_duration_secs == 0 {
            return Err(ConfigError::Invalid(
                "lock_duration_secs must be at least 1".to_string(),
            ));
        }
        if self.max_delivery_count == 0 {
            return Err(ConfigError::Invalid(
                "max_delivery_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            lock_duration: Duration::from_secs(self.lock_duration_secs),
            max_delivery_count: self.max_delivery_count,
            message_ttl: Duration::from_secs(self.message_ttl_days * 24 * 3600),
        }
    }

    pub fn queue_names(&self) -> QueueNames {
        QueueNames {
            processing: self.processing_queue.clone(),
            indexing: self.indexing_queue.clone(),
            notifications: self.notifications_queue.clone(),
        }
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            batch_size: self.poll_batch_size,
            receive_wait: Duration::from_secs(self.receive_wait_secs),
            processing_poll_interval: Duration::from_secs(self.processing_poll_secs),
            indexing_poll_interval: Duration::from_secs(self.indexing_poll_secs),
            error_backoff: Duration::from_secs(self.error_backoff_secs),
            health_interval: Duration::from_secs(self.health_check_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WorkerConfig {
        WorkerConfig {
            queue_url: "memory://".to_string(),
            data_dir: PathBuf::from("./data"),
            processing_queue: "document-processing".to_string(),
            indexing_queue: "search-indexing".to_string(),
            notifications_queue: "notifications".to_string(),
            max_retries: 3,
            lock_duration_secs: 300,
            max_delivery_count: 10,
            message_ttl_days: 14,
            poll_batch_size: 5,
            receive_wait_secs: 10,
            processing_poll_secs: 5,
            indexing_poll_secs: 3,
            error_backoff_secs: 10,
            health_check_secs: 60,
            shutdown_grace_secs: 30,
            verbose: false,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn empty_queue_url_is_rejected() {
        let mut cfg = config();
        cfg.queue_url = String::new();
        assert!(matches!(cfg.validate(), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut cfg = config();
        cfg.poll_batch_size = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn settings_are_derived_from_flags() {
        let cfg = config();
        let settings = cfg.queue_settings();
        assert_eq!(settings.lock_duration, Duration::from_secs(300));
        assert_eq!(settings.max_delivery_count, 10);

        let options = cfg.worker_options();
        assert_eq!(options.batch_size, 5);
        assert_eq!(options.shutdown_grace, Duration::from_secs(30));
    }
}
