//! Document processing pipeline.
//!
//! Each received task runs extract, categorize, persist, and index
//! steps against fresh state from the document store. Retries are
//! realized by republishing the task with an incremented counter; the
//! counter in the envelope is authoritative, never the transport's
//! delivery count.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use crate::models::{
    DocumentRecord, DocumentUpdate, IndexAction, IndexTask, Notification, ProcessingStatus,
    ProcessingTask, Severity,
};
use crate::repository::DocumentRepository;
use crate::services::bus::MessageBus;
use crate::services::category::Categorizer;
use crate::services::extract::TextExtraction;
use crate::services::search::{SearchDocument, SearchIndex};
use crate::services::storage::BlobStorage;

/// How the poller should settle a message after its handler ran.
#[derive(Debug)]
pub enum Disposition {
    /// Remove the message from the queue.
    Complete,
    /// Remove the message, then publish a follow-up task. Completing
    /// first keeps at most one envelope per document in flight.
    CompleteThenPublish(ProcessingTask),
    /// Return the message to the queue for redelivery.
    Abandon,
}

/// Why a pipeline step failed.
#[derive(Debug)]
pub enum StepError {
    /// Transient; the task is worth republishing.
    Retryable(String),
    /// Permanent; retrying cannot succeed.
    Terminal(String),
    /// The document no longer exists. Dropped silently: there is no row
    /// to mark failed and no point notifying about a deleted document.
    Gone(String),
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retryable(msg) => write!(f, "retryable: {msg}"),
            Self::Terminal(msg) => write!(f, "terminal: {msg}"),
            Self::Gone(msg) => write!(f, "gone: {msg}"),
        }
    }
}

/// Per-document async locks.
///
/// Serializes pipeline runs for the same document within this process.
/// Entries are purged once no task holds or waits on them.
#[derive(Default)]
pub struct DocumentLocks {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl DocumentLocks {
    pub async fn acquire(&self, document_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(document_id).or_default())
        };
        lock.lock_owned().await
    }
}

/// The pipeline and its collaborators.
pub struct DocumentPipeline {
    repository: Arc<dyn DocumentRepository>,
    storage: Arc<dyn BlobStorage>,
    extractor: Arc<dyn TextExtraction>,
    categorizer: Arc<dyn Categorizer>,
    search: Arc<dyn SearchIndex>,
    bus: Arc<MessageBus>,
    locks: DocumentLocks,
    max_retries: u32,
}

impl DocumentPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn DocumentRepository>,
        storage: Arc<dyn BlobStorage>,
        extractor: Arc<dyn TextExtraction>,
        categorizer: Arc<dyn Categorizer>,
        search: Arc<dyn SearchIndex>,
        bus: Arc<MessageBus>,
        max_retries: u32,
    ) -> Self {
        Self {
            repository,
            storage,
            extractor,
            categorizer,
            search,
            bus,
            locks: DocumentLocks::default(),
            max_retries,
        }
    }

    /// Handle one processing task and decide how to settle its message.
    pub async fn handle_processing(&self, task: ProcessingTask) -> Disposition {
        let _guard = self.locks.acquire(task.document_id).await;

        info!(
            document_id = task.document_id,
            kind = task.kind.as_str(),
            retry = task.retry_count,
            "processing document"
        );

        match self.process_document(&task).await {
            Ok(()) => Disposition::Complete,
            Err(StepError::Retryable(reason)) => {
                if task.retry_count < self.max_retries {
                    warn!(
                        document_id = task.document_id,
                        retry = task.retry_count + 1,
                        max = self.max_retries,
                        reason,
                        "processing failed; scheduling retry"
                    );
                    Disposition::CompleteThenPublish(task.next_attempt())
                } else {
                    error!(
                        document_id = task.document_id,
                        retries = task.retry_count,
                        reason,
                        "processing failed; retries exhausted"
                    );
                    self.fail_document(&task, &reason).await;
                    Disposition::Complete
                }
            }
            Err(StepError::Terminal(reason)) => {
                error!(
                    document_id = task.document_id,
                    reason, "processing failed permanently"
                );
                self.fail_document(&task, &reason).await;
                Disposition::Complete
            }
            Err(StepError::Gone(reason)) => {
                warn!(document_id = task.document_id, reason, "dropping task");
                Disposition::Complete
            }
        }
    }

    /// Run the extract, categorize, persist, and index steps.
    async fn process_document(&self, task: &ProcessingTask) -> Result<(), StepError> {
        let record = self
            .repository
            .get(task.document_id, task.user_id)
            .await
            .map_err(|err| StepError::Retryable(format!("document lookup failed: {err}")))?;
        let Some(record) = record else {
            // Deleted between enqueue and receive; nothing to retry.
            return Err(StepError::Gone(format!(
                "document {} not found",
                task.document_id
            )));
        };

        // Announce the first attempt only; retries stay quiet.
        if task.retry_count == 0 {
            self.bus
                .notify(Notification::new(
                    task.user_id,
                    Severity::Info,
                    "Processing started",
                    format!("Processing '{}'", record.original_filename),
                    serde_json::json!({
                        "document_id": task.document_id,
                        "processing_type": task.kind.as_str(),
                    }),
                ))
                .await;
        }

        let content = self
            .storage
            .download(&task.file_reference)
            .await
            .map_err(|err| StepError::Retryable(format!("blob download failed: {err}")))?
            .ok_or_else(|| {
                StepError::Terminal(format!("blob {} missing", task.file_reference))
            })?;

        let extracted = self
            .extractor
            .extract(&content, &record.content_type)
            .await
            .map_err(|err| StepError::Retryable(format!("text extraction failed: {err}")))?;

        let matched = self
            .categorizer
            .categorize(&record.original_filename, &extracted.text);

        let mut update = DocumentUpdate {
            extracted_text: Some(extracted.text.clone()),
            detected_label: extracted.label.clone(),
            processing_status: Some(ProcessingStatus::Completed),
            processed_at: Some(Utc::now()),
            ..Default::default()
        };
        // Automatic categorization never overwrites a manual choice and
        // never downgrades an earlier, more confident match.
        if !record.category_manual && matched.confidence > record.category_confidence {
            update.category = Some(matched.category.clone());
            update.category_confidence = Some(matched.confidence);
        }

        self.repository
            .update(task.document_id, update)
            .await
            .map_err(|err| StepError::Retryable(format!("document update failed: {err}")))?;

        // Index lag is tolerable; a failed enqueue is logged, not retried.
        let index_task = IndexTask::new(task.document_id, task.user_id, IndexAction::Index);
        if let Err(err) = self.bus.enqueue_index(&index_task).await {
            warn!(
                document_id = task.document_id,
                error = %err,
                "failed to enqueue index update"
            );
        }

        self.bus
            .notify(Notification::new(
                task.user_id,
                Severity::Success,
                "Document processed",
                format!("'{}' is ready", record.original_filename),
                serde_json::json!({ "document_id": task.document_id }),
            ))
            .await;

        info!(document_id = task.document_id, "document processed");
        Ok(())
    }

    /// Mark the document failed and tell the user. Persisting the failed
    /// status is best effort; the message is completed regardless so the
    /// queue does not spin on a broken row.
    async fn fail_document(&self, task: &ProcessingTask, reason: &str) {
        let update = DocumentUpdate {
            processing_status: Some(ProcessingStatus::Failed),
            processed_at: Some(Utc::now()),
            ..Default::default()
        };
        if let Err(err) = self.repository.update(task.document_id, update).await {
            warn!(
                document_id = task.document_id,
                error = %err,
                "failed to persist failed status"
            );
        }

        self.bus
            .notify(Notification::new(
                task.user_id,
                Severity::Error,
                "Document processing failed",
                reason.to_string(),
                serde_json::json!({ "document_id": task.document_id }),
            ))
            .await;
    }

    /// Handle one search-indexing task.
    pub async fn handle_indexing(&self, task: IndexTask) -> Disposition {
        match task.action {
            IndexAction::Index => {
                let record = match self.repository.get(task.document_id, task.user_id).await {
                    Ok(Some(record)) => record,
                    Ok(None) => {
                        // The row may not be visible yet; let the queue
                        // redeliver until the delivery cap gives up.
                        warn!(
                            document_id = task.document_id,
                            "document not found for indexing; abandoning"
                        );
                        return Disposition::Abandon;
                    }
                    Err(err) => {
                        warn!(
                            document_id = task.document_id,
                            error = %err,
                            "document lookup failed for indexing"
                        );
                        return Disposition::Abandon;
                    }
                };

                match self.search.upsert(&search_document(&record)).await {
                    Ok(()) => {
                        info!(document_id = task.document_id, "document indexed");
                        Disposition::Complete
                    }
                    Err(err) => {
                        warn!(
                            document_id = task.document_id,
                            error = %err,
                            "index upsert failed"
                        );
                        Disposition::Abandon
                    }
                }
            }
            IndexAction::Delete => match self.search.delete(task.document_id).await {
                Ok(()) => {
                    info!(document_id = task.document_id, "document removed from index");
                    Disposition::Complete
                }
                Err(err) => {
                    warn!(
                        document_id = task.document_id,
                        error = %err,
                        "index delete failed"
                    );
                    Disposition::Abandon
                }
            },
        }
    }
}

fn search_document(record: &DocumentRecord) -> SearchDocument {
    SearchDocument {
        document_id: record.id,
        user_id: record.user_id,
        filename: record.original_filename.clone(),
        category: record.category.clone(),
        content: record.extracted_text.clone().unwrap_or_default(),
        uploaded_at: record.uploaded_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProcessingKind;
    use crate::queue::{MemoryQueue, QueueSettings, QueueTransport};
    use crate::services::bus::QueueNames;
    use crate::services::category::KeywordCategorizer;
    use crate::services::extract::Extracted;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct MemoryRepository {
        records: StdMutex<HashMap<i64, DocumentRecord>>,
    }

    impl MemoryRepository {
        fn with(records: Vec<DocumentRecord>) -> Self {
            Self {
                records: StdMutex::new(records.into_iter().map(|r| (r.id, r)).collect()),
            }
        }

        fn get_sync(&self, id: i64) -> Option<DocumentRecord> {
            self.records.lock().unwrap().get(&id).cloned()
        }
    }

    #[async_trait]
    impl DocumentRepository for MemoryRepository {
        async fn get(
            &self,
            document_id: i64,
            user_id: i64,
        ) -> anyhow::Result<Option<DocumentRecord>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .get(&document_id)
                .filter(|r| r.user_id == user_id)
                .cloned())
        }

        async fn update(&self, document_id: i64, update: DocumentUpdate) -> anyhow::Result<()> {
            let mut records = self.records.lock().unwrap();
            let record = records
                .get_mut(&document_id)
                .ok_or_else(|| anyhow::anyhow!("no such document"))?;
            if let Some(v) = update.category {
                record.category = v;
            }
            if let Some(v) = update.category_confidence {
                record.category_confidence = v;
            }
            if let Some(v) = update.extracted_text {
                record.extracted_text = Some(v);
            }
            if let Some(v) = update.detected_label {
                record.detected_label = Some(v);
            }
            if let Some(v) = update.processing_status {
                record.processing_status = v;
            }
            if let Some(v) = update.processed_at {
                record.processed_at = Some(v);
            }
            Ok(())
        }

        async fn insert(&self, record: &DocumentRecord) -> anyhow::Result<i64> {
            let mut records = self.records.lock().unwrap();
            records.insert(record.id, record.clone());
            Ok(record.id)
        }
    }

    struct MemoryStorage {
        blobs: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl BlobStorage for MemoryStorage {
        async fn upload(
            &self,
            _user_id: i64,
            _filename: &str,
            _content: &[u8],
        ) -> anyhow::Result<String> {
            unimplemented!("upload not needed in pipeline tests")
        }

        async fn download(&self, path: &str) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(self.blobs.get(path).cloned())
        }

        async fn delete(&self, _path: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl TextExtraction for FailingExtractor {
        async fn extract(&self, _content: &[u8], _content_type: &str) -> anyhow::Result<Extracted> {
            anyhow::bail!("extraction backend down")
        }
    }

    struct MemorySearch {
        docs: StdMutex<HashMap<i64, SearchDocument>>,
    }

    #[async_trait]
    impl SearchIndex for MemorySearch {
        async fn upsert(&self, doc: &SearchDocument) -> anyhow::Result<()> {
            self.docs.lock().unwrap().insert(doc.document_id, doc.clone());
            Ok(())
        }

        async fn delete(&self, document_id: i64) -> anyhow::Result<()> {
            self.docs.lock().unwrap().remove(&document_id);
            Ok(())
        }
    }

    fn record(id: i64, user_id: i64) -> DocumentRecord {
        DocumentRecord {
            id,
            user_id,
            original_filename: "abc.pdf".to_string(),
            file_path: format!("user_{user_id}/abc.pdf"),
            content_type: "text/plain".to_string(),
            file_size: 20,
            category: "other".to_string(),
            category_confidence: 0.0,
            category_manual: false,
            extracted_text: None,
            detected_label: None,
            processing_status: ProcessingStatus::Pending,
            uploaded_at: Utc::now(),
            processed_at: None,
        }
    }

    struct Harness {
        pipeline: DocumentPipeline,
        repository: Arc<MemoryRepository>,
        search: Arc<MemorySearch>,
        transport: Arc<MemoryQueue>,
    }

    async fn harness(
        records: Vec<DocumentRecord>,
        blobs: Vec<(&str, &[u8])>,
        extractor: Arc<dyn TextExtraction>,
        max_retries: u32,
    ) -> Harness {
        let transport = Arc::new(MemoryQueue::new(QueueSettings::default()));
        let bus = Arc::new(MessageBus::new(
            transport.clone() as Arc<dyn QueueTransport>,
            QueueNames::default(),
        ));
        bus.ensure_queues().await.unwrap();

        let repository = Arc::new(MemoryRepository::with(records));
        let search = Arc::new(MemorySearch {
            docs: StdMutex::new(HashMap::new()),
        });
        let storage = Arc::new(MemoryStorage {
            blobs: blobs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_vec()))
                .collect(),
        });

        let pipeline = DocumentPipeline::new(
            repository.clone(),
            storage,
            extractor,
            Arc::new(KeywordCategorizer::new()),
            search.clone(),
            bus,
            max_retries,
        );
        Harness {
            pipeline,
            repository,
            search,
            transport,
        }
    }

    async fn drain(transport: &MemoryQueue, queue: &str) -> Vec<String> {
        let messages = transport
            .receive(queue, 10, Duration::from_millis(10))
            .await
            .unwrap();
        let mut bodies = Vec::new();
        for message in messages {
            transport.complete(&message.receipt).await.unwrap();
            bodies.push(message.body);
        }
        bodies
    }

    #[tokio::test]
    async fn successful_processing_completes_and_indexes() {
        let h = harness(
            vec![record(42, 7)],
            vec![("user_7/abc.pdf", b"Invoice #100 due $50")],
            Arc::new(crate::services::extract::LocalTextExtractor::new()),
            3,
        )
        .await;

        let task = ProcessingTask::new(42, 7, "user_7/abc.pdf", ProcessingKind::ExtractText);
        let disposition = h.pipeline.handle_processing(task).await;
        assert!(matches!(disposition, Disposition::Complete));

        let updated = h.repository.get_sync(42).unwrap();
        assert_eq!(updated.processing_status, ProcessingStatus::Completed);
        assert_eq!(updated.category, "invoice");
        assert!(updated.processed_at.is_some());
        assert_eq!(updated.extracted_text.as_deref(), Some("Invoice #100 due $50"));

        // One index task and one success notification were published.
        let index_bodies = drain(&h.transport, "search-indexing").await;
        assert_eq!(index_bodies.len(), 1);
        let index_task: IndexTask = serde_json::from_str(&index_bodies[0]).unwrap();
        assert_eq!(index_task.document_id, 42);
        assert_eq!(index_task.action, IndexAction::Index);

        // Start announcement first, then the success notification.
        let notifications = drain(&h.transport, "notifications").await;
        assert_eq!(notifications.len(), 2);
        let started: Notification = serde_json::from_str(&notifications[0]).unwrap();
        assert_eq!(started.severity, Severity::Info);
        let done: Notification = serde_json::from_str(&notifications[1]).unwrap();
        assert_eq!(done.severity, Severity::Success);
        assert_eq!(done.user_id, 7);
    }

    #[tokio::test]
    async fn missing_blob_is_terminal() {
        let h = harness(
            vec![record(42, 7)],
            vec![],
            Arc::new(crate::services::extract::LocalTextExtractor::new()),
            3,
        )
        .await;

        let task = ProcessingTask::new(42, 7, "user_7/abc.pdf", ProcessingKind::ExtractText);
        let disposition = h.pipeline.handle_processing(task).await;
        // Terminal failure: complete the message, never retry.
        assert!(matches!(disposition, Disposition::Complete));

        let updated = h.repository.get_sync(42).unwrap();
        assert_eq!(updated.processing_status, ProcessingStatus::Failed);

        let notifications = drain(&h.transport, "notifications").await;
        assert_eq!(notifications.len(), 2);
        let started: Notification = serde_json::from_str(&notifications[0]).unwrap();
        assert_eq!(started.severity, Severity::Info);
        let failed: Notification = serde_json::from_str(&notifications[1]).unwrap();
        assert_eq!(failed.severity, Severity::Error);
    }

    #[tokio::test]
    async fn retryable_failure_republishes_with_incremented_counter() {
        let h = harness(
            vec![record(42, 7)],
            vec![("user_7/abc.pdf", b"x")],
            Arc::new(FailingExtractor),
            3,
        )
        .await;

        let task = ProcessingTask::new(42, 7, "user_7/abc.pdf", ProcessingKind::ExtractText);
        match h.pipeline.handle_processing(task).await {
            Disposition::CompleteThenPublish(retry) => {
                assert_eq!(retry.retry_count, 1);
                assert_eq!(retry.document_id, 42);
            }
            other => panic!("expected retry, got {other:?}"),
        }
        // Status untouched until retries run out.
        let current = h.repository.get_sync(42).unwrap();
        assert_eq!(current.processing_status, ProcessingStatus::Pending);
    }

    #[tokio::test]
    async fn exhausted_retries_mark_document_failed() {
        let h = harness(
            vec![record(42, 7)],
            vec![("user_7/abc.pdf", b"x")],
            Arc::new(FailingExtractor),
            1,
        )
        .await;

        let mut task = ProcessingTask::new(42, 7, "user_7/abc.pdf", ProcessingKind::ExtractText);
        task.retry_count = 1;
        let disposition = h.pipeline.handle_processing(task).await;
        assert!(matches!(disposition, Disposition::Complete));

        let updated = h.repository.get_sync(42).unwrap();
        assert_eq!(updated.processing_status, ProcessingStatus::Failed);
    }

    #[tokio::test]
    async fn missing_document_is_dropped_quietly() {
        let h = harness(
            vec![],
            vec![],
            Arc::new(crate::services::extract::LocalTextExtractor::new()),
            3,
        )
        .await;

        let task = ProcessingTask::new(99, 7, "user_7/abc.pdf", ProcessingKind::ExtractText);
        let disposition = h.pipeline.handle_processing(task).await;
        assert!(matches!(disposition, Disposition::Complete));

        // A deleted document is dropped quietly.
        let notifications = drain(&h.transport, "notifications").await;
        assert!(notifications.is_empty());
    }

    #[tokio::test]
    async fn manual_category_is_preserved() {
        let mut rec = record(42, 7);
        rec.category = "legal".to_string();
        rec.category_manual = true;
        let h = harness(
            vec![rec],
            vec![("user_7/abc.pdf", b"Invoice #100 due $50")],
            Arc::new(crate::services::extract::LocalTextExtractor::new()),
            3,
        )
        .await;

        let task = ProcessingTask::new(42, 7, "user_7/abc.pdf", ProcessingKind::ExtractText);
        h.pipeline.handle_processing(task).await;

        let updated = h.repository.get_sync(42).unwrap();
        assert_eq!(updated.category, "legal");
        assert_eq!(updated.processing_status, ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn indexing_upserts_and_deletes() {
        let mut rec = record(42, 7);
        rec.extracted_text = Some("Invoice #100".to_string());
        let h = harness(
            vec![rec],
            vec![],
            Arc::new(crate::services::extract::LocalTextExtractor::new()),
            3,
        )
        .await;

        let disposition = h
            .pipeline
            .handle_indexing(IndexTask::new(42, 7, IndexAction::Index))
            .await;
        assert!(matches!(disposition, Disposition::Complete));
        assert!(h.search.docs.lock().unwrap().contains_key(&42));

        let disposition = h
            .pipeline
            .handle_indexing(IndexTask::new(42, 7, IndexAction::Delete))
            .await;
        assert!(matches!(disposition, Disposition::Complete));
        assert!(!h.search.docs.lock().unwrap().contains_key(&42));

        // Deleting again is still a success.
        let disposition = h
            .pipeline
            .handle_indexing(IndexTask::new(42, 7, IndexAction::Delete))
            .await;
        assert!(matches!(disposition, Disposition::Complete));
    }

    #[tokio::test]
    async fn indexing_missing_document_abandons() {
        let h = harness(
            vec![],
            vec![],
            Arc::new(crate::services::extract::LocalTextExtractor::new()),
            3,
        )
        .await;

        let disposition = h
            .pipeline
            .handle_indexing(IndexTask::new(99, 7, IndexAction::Index))
            .await;
        assert!(matches!(disposition, Disposition::Abandon));
    }
}
