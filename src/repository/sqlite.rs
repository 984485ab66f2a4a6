//! SQLite-backed document store for single-node deployments.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::DocumentRepository;
use crate::models::{DocumentRecord, DocumentUpdate, ProcessingStatus};

const SELECT_COLUMNS: &str = "id, user_id, original_filename, file_path, content_type, \
     file_size, category, category_confidence, category_manual, extracted_text, \
     detected_label, processing_status, uploaded_at, processed_at";

/// Document store backed by a SQLite database file.
///
/// Connections are opened per operation; each update is a single UPDATE
/// statement, which gives the row-level atomicity the pipeline requires.
pub struct SqliteDocumentRepository {
    db_path: PathBuf,
}

impl SqliteDocumentRepository {
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                original_filename TEXT NOT NULL,
                file_path TEXT NOT NULL,
                content_type TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                category TEXT NOT NULL DEFAULT 'other',
                category_confidence REAL NOT NULL DEFAULT 0,
                category_manual INTEGER NOT NULL DEFAULT 0,
                extracted_text TEXT,
                detected_label TEXT,
                processing_status TEXT NOT NULL DEFAULT 'pending',
                uploaded_at TEXT NOT NULL,
                processed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_documents_user
                ON documents(user_id);
            CREATE INDEX IF NOT EXISTS idx_documents_status
                ON documents(processing_status);
            "#,
        )
        .context("failed to initialize document schema")?;
        Ok(())
    }
}

fn connect(db_path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

fn row_to_record(row: &Row) -> rusqlite::Result<DocumentRecord> {
    let status: String = row.get(11)?;
    let uploaded_at: String = row.get(12)?;
    let processed_at: Option<String> = row.get(13)?;
    Ok(DocumentRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        original_filename: row.get(2)?,
        file_path: row.get(3)?,
        content_type: row.get(4)?,
        file_size: row.get::<_, i64>(5)? as u64,
        category: row.get(6)?,
        category_confidence: row.get(7)?,
        category_manual: row.get(8)?,
        extracted_text: row.get(9)?,
        detected_label: row.get(10)?,
        processing_status: ProcessingStatus::from_str(&status)
            .unwrap_or(ProcessingStatus::Pending),
        uploaded_at: parse_datetime(&uploaded_at),
        processed_at: processed_at.as_deref().map(parse_datetime),
    })
}

#[async_trait]
impl DocumentRepository for SqliteDocumentRepository {
    async fn get(&self, document_id: i64, user_id: i64) -> anyhow::Result<Option<DocumentRecord>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Option<DocumentRecord>> {
            let conn = connect(&db_path)?;
            let sql = format!("SELECT {SELECT_COLUMNS} FROM documents WHERE id = ?1 AND user_id = ?2");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query_map(params![document_id, user_id], row_to_record)?;
            match rows.next() {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
        .await?
    }

    async fn update(&self, document_id: i64, update: DocumentUpdate) -> anyhow::Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = connect(&db_path)?;
            let mut sets: Vec<&str> = Vec::new();
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(category) = update.category {
                sets.push("category = ?");
                values.push(Box::new(category));
            }
            if let Some(confidence) = update.category_confidence {
                sets.push("category_confidence = ?");
                values.push(Box::new(confidence));
            }
            if let Some(text) = update.extracted_text {
                sets.push("extracted_text = ?");
                values.push(Box::new(text));
            }
            if let Some(label) = update.detected_label {
                sets.push("detected_label = ?");
                values.push(Box::new(label));
            }
            if let Some(status) = update.processing_status {
                sets.push("processing_status = ?");
                values.push(Box::new(status.as_str()));
            }
            if let Some(at) = update.processed_at {
                sets.push("processed_at = ?");
                values.push(Box::new(at.to_rfc3339()));
            }

            let sql = format!("UPDATE documents SET {} WHERE id = ?", sets.join(", "));
            values.push(Box::new(document_id));
            let changed = conn.execute(
                &sql,
                rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
            )?;
            anyhow::ensure!(changed == 1, "document {document_id} not found");
            Ok(())
        })
        .await?
    }

    async fn insert(&self, record: &DocumentRecord) -> anyhow::Result<i64> {
        let db_path = self.db_path.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<i64> {
            let conn = connect(&db_path)?;
            conn.execute(
                r#"
                INSERT INTO documents (
                    user_id, original_filename, file_path, content_type, file_size,
                    category, category_confidence, category_manual, extracted_text,
                    detected_label, processing_status, uploaded_at, processed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
                params![
                    record.user_id,
                    record.original_filename,
                    record.file_path,
                    record.content_type,
                    record.file_size as i64,
                    record.category,
                    record.category_confidence,
                    record.category_manual,
                    record.extracted_text,
                    record.detected_label,
                    record.processing_status.as_str(),
                    record.uploaded_at.to_rfc3339(),
                    record.processed_at.map(|at| at.to_rfc3339()),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await?
    }
}
