//! MarketSync ETL Engine
//!
//! Pulls per-account marketplace data (sales, stock, finance, tariffs,
//! warehouses) from external providers into raw tables and triggers
//! downstream materialization once an event request has finished.
//!
//! # Architecture
//!
//! ```text
//! OrchestrationCommand
//!         |
//!         v
//! +------------------+     +------------------+
//! | ExecutionPlan    | --> |  SourceRegistry  |  (ordered sources per event)
//! +------------------+     +------------------+
//!         |  one execution per source
//!         v
//! +------------------+     +------------------+
//! | ExecutionWorker  | --> | MarketplaceGuards|  (rate limiter, bulkhead, retry)
//! +------------------+     +------------------+
//!         |  snapshots on disk
//!         v
//! +------------------+     +------------------+
//! | Snapshot stream  | --> | BatchDispatcher  |  (typed per-table handlers)
//! +------------------+     +------------------+
//!         |  outcome
//!         v
//! +------------------+     +------------------+
//! |ExecutionRegistry | --> | Materialization  |  (gate, claim, audit)
//! +------------------+     +------------------+
//! ```
//!
//! Retries are never slept on by a worker: a retryable failure records the
//! execution as `WAITING` with its due time and re-enqueues it on a timer.
//!
//! # Core Types
//!
//! - [`EtlOrchestrator`] - intake, dispatch, reporting and finalization
//! - [`ExecutionRegistry`] - per-request execution statuses
//! - [`EventStatusPolicy`] - aggregate status of an event request
//! - [`BatchStreamProcessor`] - bounded-memory batching of streamed rows
//! - [`EtlBatchDispatcher`] - routes row batches to typed handlers
//! - [`ResilienceFactory`] - per-marketplace guards

pub mod batch;
pub mod config;
pub mod errors;
pub mod execution;
pub mod fetch;
pub mod models;
pub mod orchestrator;
pub mod resilience;
pub mod sinks;
pub mod snapshot;
pub mod source;

pub use batch::{BatchHandler, BatchStreamProcessor, EtlBatchDispatcher, RawJsonBatchHandler, RawStore};
pub use config::{EtlConfig, MarketplaceConfig, ResilienceConfig};
pub use errors::{ConfigError, EtlError, FailureClass, FetchError, Result};
pub use execution::{EventStatusPolicy, ExecutionRegistry, ExecutionStateStore, MaterializationGate};
pub use models::{
    EventAggregation, EventStatus, EventWindow, ExecutionDescriptor, ExecutionOutcome,
    ExecutionPlan, ExecutionStatus, Marketplace, MarketplaceEvent, OrchestrationCommand,
    RawElementType, Snapshot,
};
pub use orchestrator::{EtlOrchestrator, OrchestratorDeps};
pub use resilience::ResilienceFactory;
pub use sinks::{AuditSink, Materializer};
pub use source::{EventSource, FetchRequest, RegisteredSource, SourceRegistry};
