//! Domain models shared across the engine.

mod aggregation;
mod command;
mod event;
mod execution;
mod marketplace;
mod raw;
mod window;

pub use aggregation::{EventAggregation, EventStatus};
pub use command::OrchestrationCommand;
pub use event::MarketplaceEvent;
pub use execution::{ExecutionDescriptor, ExecutionOutcome, ExecutionPlan, ExecutionStatus};
pub use marketplace::Marketplace;
pub use raw::{is_valid_raw_table, RawElementType, RawRecord, Snapshot};
pub(crate) use raw::delete_snapshot_file;
pub use window::EventWindow;
