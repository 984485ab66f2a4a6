//! Search index seam.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// Fields uploaded to the search index for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDocument {
    pub document_id: i64,
    pub user_id: i64,
    pub filename: String,
    pub category: String,
    pub content: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Full-text index operations used by the indexing handler.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Insert or overwrite the indexed fields for a document.
    async fn upsert(&self, doc: &SearchDocument) -> anyhow::Result<()>;

    /// Remove a document. Removing an absent document is a success.
    async fn delete(&self, document_id: i64) -> anyhow::Result<()>;
}

/// SQLite-backed index for single-node deployments.
pub struct SqliteSearchIndex {
    db_path: PathBuf,
}

impl SqliteSearchIndex {
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        let index = Self {
            db_path: db_path.to_path_buf(),
        };
        index.init_schema()?;
        Ok(index)
    }

    fn connect(&self) -> anyhow::Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("failed to open index at {}", self.db_path.display()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS search_documents (
                document_id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                filename TEXT NOT NULL,
                category TEXT NOT NULL,
                content TEXT NOT NULL,
                uploaded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_search_user
                ON search_documents(user_id);
            "#,
        )
        .context("failed to initialize search schema")?;
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for SqliteSearchIndex {
    async fn upsert(&self, doc: &SearchDocument) -> anyhow::Result<()> {
        let db_path = self.db_path.clone();
        let doc = doc.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = Connection::open(&db_path)?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            conn.execute(
                r#"
                INSERT OR REPLACE INTO search_documents
                    (document_id, user_id, filename, category, content, uploaded_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    doc.document_id,
                    doc.user_id,
                    doc.filename,
                    doc.category,
                    doc.content,
                    doc.uploaded_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    async fn delete(&self, document_id: i64) -> anyhow::Result<()> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = Connection::open(&db_path)?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            // Zero rows affected means the document was already absent,
            // which counts as success.
            conn.execute(
                "DELETE FROM search_documents WHERE document_id = ?1",
                params![document_id],
            )?;
            Ok(())
        })
        .await?
    }
}
