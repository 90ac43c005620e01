//! Durable execution state and materialization claims.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;

use marketsync_etl::execution::{ExecutionState, ExecutionStateStore};
use marketsync_etl::models::{ExecutionDescriptor, ExecutionOutcome, ExecutionPlan, ExecutionStatus};

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::{IntoEtl, StorageError};
use crate::schema::{etl_execution_state, etl_materialization_claims};

use super::model::ExecutionStateDB;

pub struct SqliteExecutionStateStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteExecutionStateStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    /// Reads one execution state (read-only).
    pub fn get(
        &self,
        request_id: &str,
        source_id: &str,
    ) -> marketsync_etl::Result<Option<ExecutionState>> {
        let mut conn = get_connection(&self.pool).into_etl()?;
        let row = etl_execution_state::table
            .find((request_id, source_id))
            .select(ExecutionStateDB::as_select())
            .first::<ExecutionStateDB>(&mut conn)
            .optional()
            .into_etl()?;
        row.map(ExecutionState::try_from).transpose().into_etl()
    }
}

#[async_trait]
impl ExecutionStateStore for SqliteExecutionStateStore {
    async fn register(&self, plan: &ExecutionPlan) -> marketsync_etl::Result<()> {
        let rows: Vec<ExecutionStateDB> = plan.executions.iter().map(ExecutionStateDB::pending).collect();
        self.writer
            .exec(move |conn| {
                for row in &rows {
                    diesel::insert_or_ignore_into(etl_execution_state::table)
                        .values(row)
                        .execute(conn)?;
                }
                Ok(())
            })
            .await
            .into_etl()
    }

    async fn begin_attempt(
        &self,
        descriptor: &ExecutionDescriptor,
    ) -> marketsync_etl::Result<Option<u32>> {
        let key = (descriptor.request_id.clone(), descriptor.source_id.clone());
        self.writer
            .exec(move |conn| {
                let attempts: Option<i32> = diesel::update(etl_execution_state::table.find(key))
                    .set((
                        etl_execution_state::attempts.eq(etl_execution_state::attempts + 1),
                        etl_execution_state::status.eq(ExecutionStatus::InProgress.as_str()),
                        etl_execution_state::retry_due_at.eq(None::<NaiveDateTime>),
                        etl_execution_state::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .returning(etl_execution_state::attempts)
                    .get_result(conn)
                    .optional()?;
                Ok(attempts.map(|attempts| u32::try_from(attempts).unwrap_or(0)))
            })
            .await
            .into_etl()
    }

    async fn record_outcome(
        &self,
        outcome: &ExecutionOutcome,
        retry_due_at: Option<NaiveDateTime>,
    ) -> marketsync_etl::Result<bool> {
        let descriptor = &outcome.descriptor;
        let key = (descriptor.request_id.clone(), descriptor.source_id.clone());
        let status = outcome.status.as_str();
        let last_error = outcome.error_message.clone();
        self.writer
            .exec(move |conn| {
                let updated = diesel::update(etl_execution_state::table.find(key))
                    .set((
                        etl_execution_state::status.eq(status),
                        etl_execution_state::last_error.eq(last_error),
                        etl_execution_state::retry_due_at.eq(retry_due_at),
                        etl_execution_state::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .execute(conn)?;
                Ok(updated == 1)
            })
            .await
            .into_etl()
    }

    async fn load_all(&self) -> marketsync_etl::Result<Vec<ExecutionState>> {
        let mut conn = get_connection(&self.pool).into_etl()?;
        let rows = etl_execution_state::table
            .select(ExecutionStateDB::as_select())
            .order((etl_execution_state::request_id.asc(), etl_execution_state::source_id.asc()))
            .load::<ExecutionStateDB>(&mut conn)
            .into_etl()?;
        rows.into_iter()
            .map(ExecutionState::try_from)
            .collect::<Result<Vec<_>, StorageError>>()
            .into_etl()
    }

    async fn claim_materialization(&self, request_id: &str) -> marketsync_etl::Result<bool> {
        let request_id = request_id.to_string();
        self.writer
            .exec(move |conn| {
                let inserted = diesel::insert_or_ignore_into(etl_materialization_claims::table)
                    .values((
                        etl_materialization_claims::request_id.eq(&request_id),
                        etl_materialization_claims::claimed_at.eq(Utc::now().naive_utc()),
                    ))
                    .execute(conn)?;
                Ok(inserted == 1)
            })
            .await
            .into_etl()
    }

    async fn forget(&self, request_id: &str) -> marketsync_etl::Result<()> {
        let request_id = request_id.to_string();
        self.writer
            .exec(move |conn| {
                diesel::delete(
                    etl_execution_state::table.filter(etl_execution_state::request_id.eq(&request_id)),
                )
                .execute(conn)?;
                Ok(())
            })
            .await
            .into_etl()
    }
}
