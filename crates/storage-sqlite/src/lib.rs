//! SQLite storage for the MarketSync ETL engine.
//!
//! This crate is the only place where Diesel dependencies exist. It
//! implements the storage collaborators declared by `marketsync-etl`:
//! - [`SqliteRawStore`]: per-payload-kind raw tables, provisioned on demand
//! - [`SqliteExecutionStateStore`]: durable attempt counts, statuses, retry
//!   due times and materialization claims
//! - [`SqliteAuditSink`]: one audit row per finished event request
//!
//! Reads go through the connection pool; writes are serialized through the
//! single writer actor, except raw inserts which run on the blocking pool.

pub mod audit;
pub mod db;
pub mod errors;
pub mod execution;
pub mod raw;
pub mod schema;

pub use audit::SqliteAuditSink;
pub use db::{
    create_pool, get_connection, init, open, run_migrations, spawn_writer, DbConnection, DbPool,
    WriteHandle,
};
pub use errors::{IntoEtl, StorageError};
pub use execution::SqliteExecutionStateStore;
pub use raw::SqliteRawStore;
