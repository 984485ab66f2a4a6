//! Document records as persisted by the backend.
//!
//! The document store is the single source of truth for document state;
//! the pipeline fetches fresh state on every receive and never caches
//! content across polling cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A stored document and its processing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: i64,
    pub user_id: i64,
    pub original_filename: String,
    /// Blob storage reference for the uploaded content.
    pub file_path: String,
    pub content_type: String,
    pub file_size: u64,
    pub category: String,
    /// Confidence of the automatic categorization, 0.0 when unset.
    pub category_confidence: f64,
    /// True when the category was chosen by the user. Automatic
    /// categorization never overwrites a manual choice.
    pub category_manual: bool,
    pub extracted_text: Option<String>,
    /// Coarse label reported by the extraction step (e.g. "invoice").
    pub detected_label: Option<String>,
    pub processing_status: ProcessingStatus,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Partial update applied atomically to a single document row.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    pub category: Option<String>,
    pub category_confidence: Option<f64>,
    pub extracted_text: Option<String>,
    pub detected_label: Option<String>,
    pub processing_status: Option<ProcessingStatus>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl DocumentUpdate {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.category_confidence.is_none()
            && self.extracted_text.is_none()
            && self.detected_label.is_none()
            && self.processing_status.is_none()
            && self.processed_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_roundtrip() {
        for status in [
            ProcessingStatus::Pending,
            ProcessingStatus::Completed,
            ProcessingStatus::Failed,
        ] {
            assert_eq!(ProcessingStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(ProcessingStatus::from_str("bogus"), None);
    }

    #[test]
    fn empty_update_is_detected() {
        assert!(DocumentUpdate::default().is_empty());
        let update = DocumentUpdate {
            category: Some("invoice".to_string()),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
