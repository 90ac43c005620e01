use crate::models::{EventAggregation, EventStatus};

/// Decides when an aggregation may trigger downstream materialization.
pub struct MaterializationGate;

impl MaterializationGate {
    /// True once every execution is terminal, the event is not `NO_DATA`, and
    /// at least one source delivered data.
    pub fn ready_for_materialization(aggregation: &EventAggregation) -> bool {
        if !aggregation.all_terminal() {
            return false;
        }
        if aggregation.status == EventStatus::NoData {
            return false;
        }
        aggregation.has_data
    }
}
