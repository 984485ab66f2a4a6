//! Data models: task envelopes and document records.

mod document;
mod task;

pub use document::{DocumentRecord, DocumentUpdate, ProcessingStatus};
pub use task::{IndexAction, IndexTask, Notification, ProcessingKind, ProcessingTask, Severity};
