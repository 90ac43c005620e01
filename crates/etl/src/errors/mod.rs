//! Error types and failure classification for the ETL engine.
//!
//! This module provides:
//! - [`EtlError`]: the root error for every engine operation
//! - [`FetchError`]: failures raised while pulling a snapshot from a provider
//! - [`ConfigError`]: fail-fast configuration and registration problems
//! - [`FailureClass`]: how the retry policy should treat a failure

mod failure;

pub use failure::FailureClass;

use std::time::Duration;

use thiserror::Error;

use crate::models::{Marketplace, MarketplaceEvent};

/// Type alias for Result using the engine error.
pub type Result<T> = std::result::Result<T, EtlError>;

/// Root error type for the ETL engine.
///
/// Storage-specific errors are carried as strings so this type stays
/// independent of any database driver.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("No batch handler registered for raw table '{0}'")]
    HandlerNotFound(String),

    #[error("Batch type mismatch for raw table '{raw_table}': expected {expected}, got {actual}")]
    BatchTypeMismatch {
        raw_table: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Materialization failed: {0}")]
    Materialization(String),

    /// A required event has not completed yet for the account.
    #[error("{event} for account {account_id} is waiting for {}", event_list(.missing))]
    DependencyNotSatisfied {
        account_id: i64,
        event: MarketplaceEvent,
        missing: Vec<MarketplaceEvent>,
        retry_after: Duration,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EtlError {
    /// Classifies the error for the retry policy.
    ///
    /// Fetch failures and unmet dependencies can be retried; everything else
    /// (bad payloads, storage failures, configuration mistakes) is terminal
    /// for the execution.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            EtlError::Fetch(err) => err.failure_class(),
            EtlError::DependencyNotSatisfied { retry_after, .. } => {
                FailureClass::RetryAfter(Some(*retry_after))
            }
            _ => FailureClass::Terminal,
        }
    }
}

fn event_list(events: &[MarketplaceEvent]) -> String {
    events
        .iter()
        .map(MarketplaceEvent::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failures raised while fetching a snapshot from a marketplace.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The provider answered with a non-success status.
    #[error("HTTP {status}{}", body_suffix(.body))]
    Http {
        status: u16,
        retry_after: Option<Duration>,
        body: Option<String>,
    },

    /// No response was received (connect failure, reset, timeout).
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The source asked the caller to back off before trying again.
    #[error("Backoff required, retry after {retry_after:?}")]
    BackoffRequired { retry_after: Duration },

    /// The marketplace rate limiter had no permit within its wait window.
    #[error("Rate limiter rejected call for {0}")]
    RateLimited(Marketplace),

    /// The marketplace bulkhead was full for longer than its wait window.
    #[error("Bulkhead full for {0}")]
    BulkheadFull(Marketplace),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

fn body_suffix(body: &Option<String>) -> String {
    match body {
        Some(body) if !body.is_empty() => format!(": {body}"),
        _ => String::new(),
    }
}

impl FetchError {
    /// Shorthand for an HTTP failure without body or retry hint.
    pub fn http(status: u16) -> Self {
        FetchError::Http {
            status,
            retry_after: None,
            body: None,
        }
    }

    /// Returns the retry classification for this error.
    ///
    /// - `429` honours the server's retry hint (or the configured fallback)
    /// - `408`, `425` and `5xx` retry with exponential backoff
    /// - any other status is terminal
    /// - transport failures and local guard rejections back off
    /// - decode and unexpected failures are terminal
    pub fn failure_class(&self) -> FailureClass {
        match self {
            FetchError::Http {
                status,
                retry_after,
                ..
            } => match *status {
                429 => FailureClass::RetryAfter(*retry_after),
                408 | 425 | 500..=599 => FailureClass::Backoff,
                _ => FailureClass::Terminal,
            },
            FetchError::BackoffRequired { retry_after } => {
                FailureClass::RetryAfter(Some(*retry_after))
            }
            FetchError::Transport(_) | FetchError::RateLimited(_) | FetchError::BulkheadFull(_) => {
                FailureClass::Backoff
            }
            FetchError::Decode(_) | FetchError::Other(_) => FailureClass::Terminal,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return FetchError::http(status.as_u16());
        }
        if err.is_decode() {
            return FetchError::Decode(err.to_string());
        }
        if err.is_builder() {
            return FetchError::Other(err.to_string());
        }
        FetchError::Transport(err.to_string())
    }
}

/// Configuration and registration errors. These are raised at startup or on
/// first resolution and are never retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No sources registered for event {0}")]
    NoSourcesForEvent(MarketplaceEvent),

    #[error("Source '{source_id}' is already registered for event {event}")]
    DuplicateSource {
        event: MarketplaceEvent,
        source_id: String,
    },

    #[error("Batch handler already registered for raw table '{0}'")]
    DuplicateBatchHandler(String),

    #[error("Marketplace {0} is not configured")]
    MarketplaceNotConfigured(Marketplace),

    #[error("Base URL for marketplace {0} is blank")]
    BlankBaseUrl(Marketplace),

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid raw table name '{0}'")]
    InvalidRawTable(String),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_statuses_are_classified() {
        assert_eq!(
            FetchError::http(429).failure_class(),
            FailureClass::RetryAfter(None)
        );
        for status in [408, 425, 500, 502, 503, 599] {
            assert_eq!(
                FetchError::http(status).failure_class(),
                FailureClass::Backoff,
                "status {status}"
            );
        }
        for status in [400, 401, 403, 404, 422] {
            assert_eq!(
                FetchError::http(status).failure_class(),
                FailureClass::Terminal,
                "status {status}"
            );
        }
    }

    #[test]
    fn retry_hint_is_carried_for_429() {
        let err = FetchError::Http {
            status: 429,
            retry_after: Some(Duration::from_secs(5)),
            body: None,
        };
        assert_eq!(
            err.failure_class(),
            FailureClass::RetryAfter(Some(Duration::from_secs(5)))
        );
    }

    #[test]
    fn local_rejections_back_off() {
        assert_eq!(
            FetchError::RateLimited(Marketplace::Ozon).failure_class(),
            FailureClass::Backoff
        );
        assert_eq!(
            FetchError::BulkheadFull(Marketplace::Wildberries).failure_class(),
            FailureClass::Backoff
        );
        assert_eq!(
            FetchError::Transport("reset".into()).failure_class(),
            FailureClass::Backoff
        );
    }

    #[test]
    fn non_fetch_errors_are_terminal() {
        assert_eq!(
            EtlError::Snapshot("bad".into()).failure_class(),
            FailureClass::Terminal
        );
        assert_eq!(
            EtlError::from(FetchError::Decode("x".into())).failure_class(),
            FailureClass::Terminal
        );
    }

    #[test]
    fn unmet_dependencies_wait_the_configured_delay() {
        let err = EtlError::DependencyNotSatisfied {
            account_id: 3,
            event: MarketplaceEvent::SalesFact,
            missing: vec![MarketplaceEvent::ProductDict],
            retry_after: Duration::from_secs(2),
        };
        assert_eq!(
            err.failure_class(),
            FailureClass::RetryAfter(Some(Duration::from_secs(2)))
        );
        assert_eq!(
            err.to_string(),
            "SALES_FACT for account 3 is waiting for PRODUCT_DICT"
        );
    }

    #[test]
    fn http_display_includes_body() {
        let err = FetchError::Http {
            status: 400,
            retry_after: None,
            body: Some("bad window".into()),
        };
        assert_eq!(err.to_string(), "HTTP 400: bad window");
        assert_eq!(FetchError::http(500).to_string(), "HTTP 500");
    }
}
