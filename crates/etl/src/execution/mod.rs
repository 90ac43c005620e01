//! Execution tracking: status policy, per-request registry, materialization
//! gate and durable execution state.

mod gate;
mod policy;
mod registry;
mod state_store;

pub use gate::MaterializationGate;
pub use policy::EventStatusPolicy;
pub use registry::ExecutionRegistry;
pub use state_store::{ExecutionState, ExecutionStateStore, InMemoryExecutionStateStore};
