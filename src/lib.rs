//! docflow: asynchronous document processing backend.
//!
//! Documents uploaded by users are processed off the request path by a
//! queue-driven worker: text extraction, categorization, search
//! indexing, and user notifications, with retry-by-republish on
//! transient failures.

pub mod config;
pub mod models;
pub mod queue;
pub mod repository;
pub mod services;
pub mod worker;
