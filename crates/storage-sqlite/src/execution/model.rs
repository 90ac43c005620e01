//! Database models for durable execution state.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;

use marketsync_etl::execution::ExecutionState;
use marketsync_etl::models::{EventWindow, ExecutionDescriptor, ExecutionStatus};

use crate::errors::StorageError;

/// Database model for one execution of one request.
#[derive(Queryable, Insertable, Selectable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = crate::schema::etl_execution_state)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(primary_key(request_id, source_id))]
pub struct ExecutionStateDB {
    pub request_id: String,
    pub source_id: String,
    pub account_id: i64,
    pub event: String,
    pub marketplace: String,
    pub raw_table: String,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub retry_due_at: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}

impl ExecutionStateDB {
    pub fn pending(descriptor: &ExecutionDescriptor) -> Self {
        Self {
            request_id: descriptor.request_id.clone(),
            source_id: descriptor.source_id.clone(),
            account_id: descriptor.account_id,
            event: descriptor.event.as_str().to_string(),
            marketplace: descriptor.marketplace.as_str().to_string(),
            raw_table: descriptor.raw_table.clone(),
            date_from: descriptor.window.from(),
            date_to: descriptor.window.to(),
            status: ExecutionStatus::Pending.as_str().to_string(),
            attempts: 0,
            last_error: None,
            retry_due_at: None,
            updated_at: Utc::now().naive_utc(),
        }
    }
}

impl TryFrom<ExecutionStateDB> for ExecutionState {
    type Error = StorageError;

    fn try_from(db: ExecutionStateDB) -> Result<Self, Self::Error> {
        let corrupt = |e: String| {
            StorageError::Corrupt(format!("{}/{}: {}", db.request_id, db.source_id, e))
        };
        let window = EventWindow::new(db.date_from, db.date_to).map_err(|e| corrupt(e.to_string()))?;
        let descriptor = ExecutionDescriptor {
            request_id: db.request_id.clone(),
            account_id: db.account_id,
            event: db.event.parse().map_err(corrupt)?,
            window,
            marketplace: db.marketplace.parse().map_err(corrupt)?,
            source_id: db.source_id.clone(),
            raw_table: db.raw_table.clone(),
        };
        Ok(ExecutionState {
            descriptor,
            attempts: u32::try_from(db.attempts).unwrap_or(0),
            status: db.status.parse().map_err(corrupt)?,
            last_error: db.last_error,
            retry_due_at: db.retry_due_at,
            updated_at: db.updated_at,
        })
    }
}
