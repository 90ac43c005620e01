//! Batch pipeline: bounded batching of streamed rows and typed dispatch.

mod dispatcher;
mod processor;
mod raw_store;

pub use dispatcher::{BatchContext, BatchHandler, EtlBatchDispatcher};
pub use processor::{BatchStats, BatchStreamProcessor};
pub use raw_store::{InMemoryRawStore, NewRawRow, RawJsonBatchHandler, RawStore, StoredRawRow};
