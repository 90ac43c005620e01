//! Append-only raw payload tables, one per raw payload kind.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text, Timestamp};
use log::{debug, info, warn};

use marketsync_etl::batch::{NewRawRow, RawStore};
use marketsync_etl::models::is_valid_raw_table;

use crate::db::{get_connection, DbPool};
use crate::errors::{IntoEtl, StorageError};

#[derive(QueryableByName)]
struct TableName {
    #[diesel(sql_type = Text)]
    name: String,
}

#[derive(QueryableByName)]
struct RowCount {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

/// Raw storage on SQLite.
///
/// Tables are created on first use and remembered, so provisioning runs once
/// per table per process.
pub struct SqliteRawStore {
    pool: Arc<DbPool>,
    provisioned: Mutex<HashSet<String>>,
}

impl SqliteRawStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self {
            pool,
            provisioned: Mutex::new(HashSet::new()),
        }
    }

    fn lock_provisioned(&self) -> MutexGuard<'_, HashSet<String>> {
        self.provisioned.lock().unwrap_or_else(|poisoned| {
            warn!("Raw table cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn checked(raw_table: &str) -> Result<&str, StorageError> {
        if is_valid_raw_table(raw_table) {
            Ok(raw_table)
        } else {
            Err(StorageError::InvalidTable(raw_table.to_string()))
        }
    }

    pub fn table_exists(&self, raw_table: &str) -> Result<bool, StorageError> {
        let mut conn = get_connection(&self.pool)?;
        let found = diesel::sql_query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind::<Text, _>(raw_table)
            .load::<TableName>(&mut conn)?;
        Ok(found.iter().any(|t| t.name == raw_table))
    }

    pub fn count(&self, raw_table: &str) -> Result<i64, StorageError> {
        let raw_table = Self::checked(raw_table)?;
        let mut conn = get_connection(&self.pool)?;
        let rows = diesel::sql_query(format!("SELECT COUNT(*) AS count FROM {}", raw_table))
            .load::<RowCount>(&mut conn)?;
        Ok(rows.first().map(|r| r.count).unwrap_or(0))
    }

    fn provision(&self, raw_table: &str) -> Result<(), StorageError> {
        let raw_table = Self::checked(raw_table)?;
        if self.table_exists(raw_table)? {
            debug!("Raw table {} already exists", raw_table);
            return Ok(());
        }
        let mut conn = get_connection(&self.pool)?;
        conn.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                request_id TEXT NOT NULL,
                account_id BIGINT NOT NULL,
                marketplace TEXT NOT NULL,
                payload TEXT NOT NULL CHECK (json_valid(payload)),
                created_at TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS ix_{t}_request_id ON {t} (request_id);
            CREATE INDEX IF NOT EXISTS ix_{t}_account_marketplace ON {t} (account_id, marketplace);",
            t = raw_table
        ))?;
        info!("Created raw table {}", raw_table);
        Ok(())
    }

    fn insert(&self, raw_table: &str, rows: &[NewRawRow]) -> Result<usize, StorageError> {
        let raw_table = Self::checked(raw_table)?;
        if rows.is_empty() {
            return Ok(0);
        }
        let statement = format!(
            "INSERT INTO {} (request_id, account_id, marketplace, payload, created_at) VALUES (?, ?, ?, ?, ?)",
            raw_table
        );
        let now = Utc::now().naive_utc();
        let mut conn = get_connection(&self.pool)?;
        conn.immediate_transaction::<_, StorageError, _>(|conn| {
            let mut inserted = 0;
            for row in rows {
                inserted += diesel::sql_query(statement.as_str())
                    .bind::<Text, _>(&row.request_id)
                    .bind::<BigInt, _>(row.account_id)
                    .bind::<Text, _>(row.marketplace.as_str())
                    .bind::<Text, _>(&row.payload)
                    .bind::<Timestamp, _>(now)
                    .execute(conn)?;
            }
            Ok(inserted)
        })
    }
}

impl RawStore for SqliteRawStore {
    fn ensure_table(&self, raw_table: &str) -> marketsync_etl::Result<()> {
        if self.lock_provisioned().contains(raw_table) {
            return Ok(());
        }
        self.provision(raw_table).into_etl()?;
        self.lock_provisioned().insert(raw_table.to_string());
        Ok(())
    }

    fn insert_batch(&self, raw_table: &str, rows: &[NewRawRow]) -> marketsync_etl::Result<usize> {
        let inserted = self.insert(raw_table, rows).into_etl()?;
        debug!("Inserted {} rows into {}", inserted, raw_table);
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::open_temp;
    use marketsync_etl::models::Marketplace;
    use marketsync_etl::EtlError;

    fn row(request_id: &str, payload: &str) -> NewRawRow {
        NewRawRow {
            request_id: request_id.into(),
            account_id: 11,
            marketplace: Marketplace::Ozon,
            payload: payload.into(),
        }
    }

    #[tokio::test]
    async fn provisions_once_and_appends_rows() {
        let (_dir, pool, _writer) = open_temp();
        let store = SqliteRawStore::new(pool);

        assert!(!store.table_exists("raw_ozon_stock").unwrap());
        store.ensure_table("raw_ozon_stock").unwrap();
        store.ensure_table("raw_ozon_stock").unwrap();
        assert!(store.table_exists("raw_ozon_stock").unwrap());

        let inserted = store
            .insert_batch(
                "raw_ozon_stock",
                &[row("r1", r#"{"sku":1}"#), row("r1", r#"{"sku":2}"#)],
            )
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(store.count("raw_ozon_stock").unwrap(), 2);
    }

    #[tokio::test]
    async fn rejects_unsafe_table_names() {
        let (_dir, pool, _writer) = open_temp();
        let store = SqliteRawStore::new(pool);

        let err = store.ensure_table("raw_x; DROP TABLE etl_event_audit").unwrap_err();
        assert!(matches!(err, EtlError::Storage(message) if message.contains("Invalid raw table")));
    }

    #[tokio::test]
    async fn invalid_payload_rolls_back_the_batch() {
        let (_dir, pool, _writer) = open_temp();
        let store = SqliteRawStore::new(pool);
        store.ensure_table("raw_wb_sales").unwrap();

        let result = store.insert_batch("raw_wb_sales", &[row("r1", "{}"), row("r1", "not json")]);

        assert!(result.is_err());
        assert_eq!(store.count("raw_wb_sales").unwrap(), 0);
    }
}
