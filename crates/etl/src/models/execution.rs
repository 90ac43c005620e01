use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{EventWindow, Marketplace, MarketplaceEvent};

/// One source's unit of work within one event request.
///
/// Created once per `(request_id, source_id)` when the plan is built and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDescriptor {
    pub request_id: String,
    pub account_id: i64,
    pub event: MarketplaceEvent,
    pub window: EventWindow,
    pub marketplace: Marketplace,
    pub source_id: String,
    pub raw_table: String,
}

impl ExecutionDescriptor {
    /// Short `request/source` label for log lines.
    pub fn label(&self) -> String {
        format!("{}/{}", self.request_id, self.source_id)
    }
}

/// Lifecycle of a single execution.
///
/// `Pending -> InProgress -> {Waiting, Success, NoData, Error}`. `Waiting` goes
/// back to `InProgress` on the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    InProgress,
    Waiting,
    Success,
    NoData,
    Error,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 6] = [
        ExecutionStatus::Pending,
        ExecutionStatus::InProgress,
        ExecutionStatus::Waiting,
        ExecutionStatus::Success,
        ExecutionStatus::NoData,
        ExecutionStatus::Error,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::NoData | ExecutionStatus::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::InProgress => "IN_PROGRESS",
            ExecutionStatus::Waiting => "WAITING",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::NoData => "NO_DATA",
            ExecutionStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExecutionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown execution status: {}", s))
    }
}

/// Result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub descriptor: ExecutionDescriptor,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub retry_after: Option<Duration>,
    pub rows_count: u64,
}

impl ExecutionOutcome {
    fn with_status(descriptor: ExecutionDescriptor, status: ExecutionStatus) -> Self {
        Self {
            descriptor,
            status,
            error_message: None,
            retry_after: None,
            rows_count: 0,
        }
    }

    pub fn in_progress(descriptor: ExecutionDescriptor) -> Self {
        Self::with_status(descriptor, ExecutionStatus::InProgress)
    }

    pub fn success(descriptor: ExecutionDescriptor, rows_count: u64) -> Self {
        Self {
            rows_count,
            ..Self::with_status(descriptor, ExecutionStatus::Success)
        }
    }

    pub fn no_data(descriptor: ExecutionDescriptor) -> Self {
        Self::with_status(descriptor, ExecutionStatus::NoData)
    }

    pub fn waiting(descriptor: ExecutionDescriptor, retry_after: Duration, message: String) -> Self {
        Self {
            retry_after: Some(retry_after),
            error_message: Some(message),
            ..Self::with_status(descriptor, ExecutionStatus::Waiting)
        }
    }

    pub fn error(descriptor: ExecutionDescriptor, message: String) -> Self {
        Self {
            error_message: Some(message),
            ..Self::with_status(descriptor, ExecutionStatus::Error)
        }
    }
}

/// Every execution of one event request, in source order.
///
/// Executions are enqueued in this order but run concurrently.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub request_id: String,
    pub account_id: i64,
    pub event: MarketplaceEvent,
    pub window: EventWindow,
    pub executions: Vec<ExecutionDescriptor>,
}
