use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use diesel::prelude::*;

use marketsync_etl::sinks::AuditRecord;

use crate::errors::StorageError;

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::etl_event_audit)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EventAuditDB {
    pub id: i32,
    pub request_id: String,
    pub account_id: i64,
    pub event: String,
    pub status: String,
    /// JSON array of source ids.
    pub failed_sources: String,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::etl_event_audit)]
pub struct NewEventAuditDB {
    pub request_id: String,
    pub account_id: i64,
    pub event: String,
    pub status: String,
    pub failed_sources: String,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
}

impl TryFrom<&AuditRecord> for NewEventAuditDB {
    type Error = StorageError;

    fn try_from(record: &AuditRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            request_id: record.request_id.clone(),
            account_id: record.account_id,
            event: record.event.as_str().to_string(),
            status: record.status.as_str().to_string(),
            failed_sources: serde_json::to_string(&record.failed_sources)?,
            started_at: record.started_at,
            finished_at: record.finished_at,
        })
    }
}

impl EventAuditDB {
    pub fn failed_source_ids(&self) -> Result<BTreeSet<String>, StorageError> {
        Ok(serde_json::from_str(&self.failed_sources)?)
    }
}
