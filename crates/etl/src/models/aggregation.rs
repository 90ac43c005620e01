use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{EventWindow, ExecutionStatus, MarketplaceEvent};

/// Aggregate status of an event request, derived from its execution statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,
    InProgress,
    Waiting,
    Success,
    PartialSuccess,
    NoData,
    Error,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::InProgress => "IN_PROGRESS",
            EventStatus::Waiting => "WAITING",
            EventStatus::Success => "SUCCESS",
            EventStatus::PartialSuccess => "PARTIAL_SUCCESS",
            EventStatus::NoData => "NO_DATA",
            EventStatus::Error => "ERROR",
        }
    }

    /// Terminal without being `ERROR`. Dependent events may run after it.
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            EventStatus::Success | EventStatus::PartialSuccess | EventStatus::NoData
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of an event request.
///
/// A fresh value is produced on every outcome update; the mutable state lives
/// in the execution registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAggregation {
    pub request_id: String,
    pub account_id: i64,
    pub event: MarketplaceEvent,
    pub window: EventWindow,
    pub status: EventStatus,
    pub execution_statuses: BTreeMap<String, ExecutionStatus>,
    pub failed_sources: BTreeSet<String>,
    pub has_data: bool,
    pub started_at: NaiveDateTime,
}

impl EventAggregation {
    pub fn all_terminal(&self) -> bool {
        self.execution_statuses.values().all(|s| s.is_terminal())
    }
}
