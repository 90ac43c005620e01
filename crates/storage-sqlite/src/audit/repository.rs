//! Audit trail of finished event requests.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use log::debug;

use marketsync_etl::models::{EventStatus, MarketplaceEvent};
use marketsync_etl::sinks::{AuditRecord, AuditSink};

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::IntoEtl;
use crate::schema::etl_event_audit;

use super::model::{EventAuditDB, NewEventAuditDB};

pub struct SqliteAuditSink {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteAuditSink {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    /// Audit rows of a request, oldest first.
    pub fn for_request(&self, request_id: &str) -> marketsync_etl::Result<Vec<EventAuditDB>> {
        let mut conn = get_connection(&self.pool).into_etl()?;
        etl_event_audit::table
            .filter(etl_event_audit::request_id.eq(request_id))
            .order(etl_event_audit::id.asc())
            .select(EventAuditDB::as_select())
            .load(&mut conn)
            .into_etl()
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, record: &AuditRecord) -> marketsync_etl::Result<()> {
        let row = NewEventAuditDB::try_from(record).into_etl()?;
        let request_id = row.request_id.clone();
        self.writer
            .exec(move |conn| {
                diesel::insert_into(etl_event_audit::table)
                    .values(&row)
                    .execute(conn)?;
                Ok(())
            })
            .await
            .into_etl()?;
        debug!("Audited request {}", request_id);
        Ok(())
    }

    async fn has_completed(
        &self,
        account_id: i64,
        event: MarketplaceEvent,
    ) -> marketsync_etl::Result<bool> {
        let completed = [
            EventStatus::Success.as_str(),
            EventStatus::PartialSuccess.as_str(),
            EventStatus::NoData.as_str(),
        ];
        let mut conn = get_connection(&self.pool).into_etl()?;
        diesel::select(diesel::dsl::exists(
            etl_event_audit::table
                .filter(etl_event_audit::account_id.eq(account_id))
                .filter(etl_event_audit::event.eq(event.as_str()))
                .filter(etl_event_audit::status.eq_any(completed)),
        ))
        .get_result::<bool>(&mut conn)
        .into_etl()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::open_temp;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn audit(account_id: i64, event: MarketplaceEvent, status: EventStatus) -> AuditRecord {
        let now = Utc::now().naive_utc();
        AuditRecord {
            request_id: format!("req-{}-{}", account_id, event.tag()),
            account_id,
            event,
            status,
            failed_sources: BTreeSet::new(),
            started_at: now,
            finished_at: now,
        }
    }

    #[tokio::test]
    async fn records_terminal_aggregations() {
        let (_dir, pool, writer) = open_temp();
        let sink = SqliteAuditSink::new(pool, writer);
        let now = Utc::now().naive_utc();
        let record = AuditRecord {
            request_id: "req-3".into(),
            account_id: 8,
            event: MarketplaceEvent::SalesFact,
            status: EventStatus::PartialSuccess,
            failed_sources: BTreeSet::from(["ozon_returns".to_string()]),
            started_at: now,
            finished_at: now,
        };

        sink.record(&record).await.unwrap();

        let rows = sink.for_request("req-3").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "PARTIAL_SUCCESS");
        assert_eq!(rows[0].event, "SALES_FACT");
        assert_eq!(
            rows[0].failed_source_ids().unwrap(),
            BTreeSet::from(["ozon_returns".to_string()])
        );
        assert!(sink.for_request("other").unwrap().is_empty());
    }

    #[tokio::test]
    async fn completion_ignores_errors_and_other_accounts() {
        let (_dir, pool, writer) = open_temp();
        let sink = SqliteAuditSink::new(pool, writer);
        let dict = MarketplaceEvent::ProductDict;

        assert!(!sink.has_completed(4, dict).await.unwrap());
        sink.record(&audit(4, dict, EventStatus::Error)).await.unwrap();
        sink.record(&audit(5, dict, EventStatus::Success)).await.unwrap();
        assert!(!sink.has_completed(4, dict).await.unwrap());

        sink.record(&audit(4, dict, EventStatus::PartialSuccess)).await.unwrap();
        assert!(sink.has_completed(4, dict).await.unwrap());
        assert!(!sink
            .has_completed(4, MarketplaceEvent::WarehouseDict)
            .await
            .unwrap());
    }
}
