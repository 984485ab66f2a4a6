//! Task envelopes exchanged over the message queues.
//!
//! An envelope is created by a producer, owned by the queue until received,
//! and owned by the consuming worker until completed or abandoned. Envelopes
//! are never mutated in place on the queue; retries are realized by
//! publishing a fresh envelope with an incremented counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of processing requested for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingKind {
    ExtractText,
    DetectCategory,
    GenerateSummary,
}

impl ProcessingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtractText => "extract_text",
            Self::DetectCategory => "detect_category",
            Self::GenerateSummary => "generate_summary",
        }
    }
}

/// Unit of work on the document-processing queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub document_id: i64,
    pub user_id: i64,
    /// Blob storage reference for the uploaded file.
    pub file_reference: String,
    pub kind: ProcessingKind,
    /// Number of previous attempts in this task's retry chain.
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl ProcessingTask {
    pub fn new(
        document_id: i64,
        user_id: i64,
        file_reference: impl Into<String>,
        kind: ProcessingKind,
    ) -> Self {
        Self {
            document_id,
            user_id,
            file_reference: file_reference.into(),
            kind,
            retry_count: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// Envelope for the next retry attempt.
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            enqueued_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Action requested on the search-indexing queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexAction {
    Index,
    Delete,
}

impl IndexAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Delete => "delete",
        }
    }
}

/// Unit of work on the search-indexing queue.
///
/// Logically idempotent: re-applying `index` overwrites, re-applying
/// `delete` on an already-absent document is a success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexTask {
    pub document_id: i64,
    pub user_id: i64,
    pub action: IndexAction,
    pub enqueued_at: DateTime<Utc>,
}

impl IndexTask {
    pub fn new(document_id: i64, user_id: i64, action: IndexAction) -> Self {
        Self {
            document_id,
            user_id,
            action,
            enqueued_at: Utc::now(),
        }
    }
}

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Error,
}

/// User-facing status event published to the shared notifications queue.
///
/// The id is globally unique; consumers treat redelivery of the same id as
/// a duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: i64,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub persistent: bool,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: i64,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
        metadata: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            message: message.into(),
            severity,
            persistent: false,
            metadata,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_task_roundtrips_as_json() {
        let task = ProcessingTask::new(42, 7, "user_7/abc.pdf", ProcessingKind::ExtractText);
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"extract_text\""));
        let back: ProcessingTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back.document_id, 42);
        assert_eq!(back.retry_count, 0);
    }

    #[test]
    fn next_attempt_increments_counter_only() {
        let task = ProcessingTask::new(1, 2, "p", ProcessingKind::ExtractText);
        let retry = task.next_attempt();
        assert_eq!(retry.retry_count, 1);
        assert_eq!(retry.document_id, task.document_id);
        assert_eq!(retry.file_reference, task.file_reference);
    }

    #[test]
    fn notifications_get_unique_ids() {
        let a = Notification::new(1, Severity::Info, "t", "m", serde_json::json!({}));
        let b = Notification::new(1, Severity::Info, "t", "m", serde_json::json!({}));
        assert_ne!(a.id, b.id);
    }
}
