//! Append-only raw payload storage.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{NaiveDateTime, Utc};
use log::warn;
use serde::Serialize;

use super::{BatchContext, BatchHandler};
use crate::errors::{ConfigError, EtlError, Result};
use crate::models::{is_valid_raw_table, Marketplace};

/// One row to append to a raw table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRawRow {
    pub request_id: String,
    pub account_id: i64,
    pub marketplace: Marketplace,
    /// Serialized JSON payload.
    pub payload: String,
}

/// Storage of raw payloads, one table per payload kind.
///
/// Each table has `id`, `request_id`, `account_id`, `marketplace`, `payload`
/// and `created_at` columns and is indexed on `request_id` and on
/// `(account_id, marketplace)`.
pub trait RawStore: Send + Sync {
    /// Creates the table when it does not exist yet. Idempotent.
    fn ensure_table(&self, raw_table: &str) -> Result<()>;

    /// Appends rows in one transaction and returns how many were written.
    fn insert_batch(&self, raw_table: &str, rows: &[NewRawRow]) -> Result<usize>;
}

fn check_raw_table(raw_table: &str) -> Result<()> {
    if is_valid_raw_table(raw_table) {
        Ok(())
    } else {
        Err(ConfigError::InvalidRawTable(raw_table.to_string()).into())
    }
}

/// A row held by [`InMemoryRawStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRawRow {
    pub id: i64,
    pub row: NewRawRow,
    pub created_at: NaiveDateTime,
}

/// Process-local raw store for tests and dry runs.
#[derive(Default)]
pub struct InMemoryRawStore {
    tables: Mutex<HashMap<String, Vec<StoredRawRow>>>,
}

impl InMemoryRawStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_tables(&self) -> MutexGuard<'_, HashMap<String, Vec<StoredRawRow>>> {
        self.tables.lock().unwrap_or_else(|poisoned| {
            warn!("In-memory raw store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn rows(&self, raw_table: &str) -> Vec<StoredRawRow> {
        self.lock_tables().get(raw_table).cloned().unwrap_or_default()
    }

    pub fn has_table(&self, raw_table: &str) -> bool {
        self.lock_tables().contains_key(raw_table)
    }
}

impl RawStore for InMemoryRawStore {
    fn ensure_table(&self, raw_table: &str) -> Result<()> {
        check_raw_table(raw_table)?;
        self.lock_tables().entry(raw_table.to_string()).or_default();
        Ok(())
    }

    fn insert_batch(&self, raw_table: &str, rows: &[NewRawRow]) -> Result<usize> {
        let mut tables = self.lock_tables();
        let table = tables
            .get_mut(raw_table)
            .ok_or_else(|| EtlError::Storage(format!("raw table {} does not exist", raw_table)))?;
        let now = Utc::now().naive_utc();
        for row in rows {
            let id = table.len() as i64 + 1;
            table.push(StoredRawRow {
                id,
                row: row.clone(),
                created_at: now,
            });
        }
        Ok(rows.len())
    }
}

/// Persists typed rows as JSON payloads into their raw table.
pub struct RawJsonBatchHandler<R> {
    store: Arc<dyn RawStore>,
    _row: PhantomData<fn() -> R>,
}

impl<R> RawJsonBatchHandler<R> {
    pub fn new(store: Arc<dyn RawStore>) -> Self {
        Self {
            store,
            _row: PhantomData,
        }
    }
}

impl<R: Serialize + Send + 'static> BatchHandler for RawJsonBatchHandler<R> {
    type Row = R;

    fn handle_batch(&self, rows: Vec<R>, context: &BatchContext) -> Result<usize> {
        let rows = rows
            .iter()
            .map(|row| {
                Ok(NewRawRow {
                    request_id: context.request_id.clone(),
                    account_id: context.account_id,
                    marketplace: context.marketplace,
                    payload: serde_json::to_string(row)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.store.insert_batch(&context.raw_table, &rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketplaceEvent;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Sale {
        sale_id: String,
        #[serde(flatten)]
        rest: serde_json::Map<String, serde_json::Value>,
    }

    #[test]
    fn handler_appends_json_payloads() {
        let store = Arc::new(InMemoryRawStore::new());
        store.ensure_table("raw_wb_sales").unwrap();
        store.ensure_table("raw_wb_sales").unwrap();

        let handler = RawJsonBatchHandler::<Sale>::new(store.clone());
        let context = BatchContext {
            request_id: "req-9".into(),
            account_id: 3,
            marketplace: Marketplace::Wildberries,
            event: MarketplaceEvent::SalesFact,
            raw_table: "raw_wb_sales".into(),
        };
        let sale: Sale = serde_json::from_str(r#"{"saleId": "S1", "price": 10}"#).unwrap();
        assert_eq!(handler.handle_batch(vec![sale], &context).unwrap(), 1);

        let rows = store.rows("raw_wb_sales");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row.request_id, "req-9");
        let payload: serde_json::Value = serde_json::from_str(&rows[0].row.payload).unwrap();
        assert_eq!(payload["saleId"], "S1");
        assert_eq!(payload["price"], 10);
    }

    #[test]
    fn rejects_unsafe_table_names_and_missing_tables() {
        let store = InMemoryRawStore::new();
        assert!(store.ensure_table("sales; drop").is_err());
        assert!(store.insert_batch("raw_unknown", &[]).is_err());
    }
}
