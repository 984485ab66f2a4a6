//! Persistence seam for document records.
//!
//! The document store is the single source of truth for document state.
//! Updates must be atomic per row: workers may run in several processes,
//! so cross-worker safety cannot rely on in-process locks.

pub mod sqlite;

use async_trait::async_trait;

use crate::models::{DocumentRecord, DocumentUpdate};

pub use sqlite::SqliteDocumentRepository;

/// Document persistence operations used by the pipeline.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Fetch a document owned by `user_id`.
    async fn get(&self, document_id: i64, user_id: i64) -> anyhow::Result<Option<DocumentRecord>>;

    /// Apply a partial update to one document row atomically.
    async fn update(&self, document_id: i64, update: DocumentUpdate) -> anyhow::Result<()>;

    /// Insert a new record, returning its assigned id.
    async fn insert(&self, record: &DocumentRecord) -> anyhow::Result<i64>;
}
