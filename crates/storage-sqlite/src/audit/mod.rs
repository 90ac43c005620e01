mod model;
mod repository;

pub use model::{EventAuditDB, NewEventAuditDB};
pub use repository::SqliteAuditSink;
