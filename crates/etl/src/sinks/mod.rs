//! Downstream collaborators: materialization and audit.

mod audit;
mod materializer;

pub use audit::{AuditRecord, AuditSink, RecordingAuditSink};
pub use materializer::{
    LoggingMaterializer, MaterializationRequest, Materializer, RecordingMaterializer,
};
