//! Audit trail of terminal event aggregations.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::models::{EventAggregation, EventStatus, MarketplaceEvent};

/// One record per terminal event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub request_id: String,
    pub account_id: i64,
    pub event: MarketplaceEvent,
    pub status: EventStatus,
    pub failed_sources: BTreeSet<String>,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
}

impl AuditRecord {
    pub fn from_aggregation(aggregation: &EventAggregation) -> Self {
        Self {
            request_id: aggregation.request_id.clone(),
            account_id: aggregation.account_id,
            event: aggregation.event,
            status: aggregation.status,
            failed_sources: aggregation.failed_sources.clone(),
            started_at: aggregation.started_at,
            finished_at: Utc::now().naive_utc(),
        }
    }
}

/// Receives audit records. Failures are logged by the caller and never
/// affect the request outcome.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<()>;

    /// Whether a request for `event` ever completed for the account, i.e.
    /// finished with a status other than `ERROR`.
    async fn has_completed(&self, account_id: i64, event: MarketplaceEvent) -> Result<bool>;
}

/// Collects audit records, for tests.
#[derive(Clone, Default)]
pub struct RecordingAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    async fn has_completed(&self, account_id: i64, event: MarketplaceEvent) -> Result<bool> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|r| r.account_id == account_id && r.event == event && r.status.is_completed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(account_id: i64, event: MarketplaceEvent, status: EventStatus) -> AuditRecord {
        let now = Utc::now().naive_utc();
        AuditRecord {
            request_id: format!("{}-{}", account_id, event.tag()),
            account_id,
            event,
            status,
            failed_sources: BTreeSet::new(),
            started_at: now,
            finished_at: now,
        }
    }

    #[tokio::test]
    async fn only_non_error_outcomes_complete_an_event() {
        let sink = RecordingAuditSink::new();
        let dict = MarketplaceEvent::ProductDict;
        sink.record(&record(1, dict, EventStatus::Error)).await.unwrap();
        assert!(!sink.has_completed(1, dict).await.unwrap());

        sink.record(&record(1, dict, EventStatus::NoData)).await.unwrap();
        assert!(sink.has_completed(1, dict).await.unwrap());
        assert!(!sink.has_completed(2, dict).await.unwrap());
        assert!(!sink
            .has_completed(1, MarketplaceEvent::WarehouseDict)
            .await
            .unwrap());
    }
}
