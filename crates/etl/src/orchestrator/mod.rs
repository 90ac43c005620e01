//! Orchestration glue: command intake, plan construction, execution
//! dispatch and retry scheduling.

mod completion;
mod ingest;
mod plan;
mod queue;
mod service;
mod worker;

pub use completion::CompletionNotifier;
pub use ingest::SnapshotIngestor;
pub use plan::{AccountConnections, ExecutionPlanFactory, StaticAccountConnections};
pub use queue::ExecutionQueue;
pub use service::{EtlOrchestrator, OrchestratorDeps};
pub use worker::ExecutionWorker;
