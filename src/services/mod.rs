//! Service layer: capability seams consumed by the pipeline, plus the
//! message bus, the pipeline itself, and the notification reader.

pub mod bus;
pub mod category;
pub mod extract;
pub mod notifications;
pub mod pipeline;
pub mod search;
pub mod storage;
