//! Downstream materialization collaborator.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use log::info;

use crate::errors::Result;
use crate::models::{EventAggregation, EventWindow, MarketplaceEvent};

/// What to materialize. `request_id` doubles as the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializationRequest {
    pub request_id: String,
    pub account_id: i64,
    pub event: MarketplaceEvent,
    pub window: EventWindow,
}

impl From<&EventAggregation> for MaterializationRequest {
    fn from(aggregation: &EventAggregation) -> Self {
        Self {
            request_id: aggregation.request_id.clone(),
            account_id: aggregation.account_id,
            event: aggregation.event,
            window: aggregation.window,
        }
    }
}

/// Transforms ingested raw rows into query-ready facts.
///
/// Invoked at most once per ready request.
#[async_trait]
pub trait Materializer: Send + Sync {
    async fn materialize(&self, request: &MaterializationRequest) -> Result<()>;
}

/// Only logs what would be materialized.
#[derive(Clone, Default)]
pub struct LoggingMaterializer;

#[async_trait]
impl Materializer for LoggingMaterializer {
    async fn materialize(&self, request: &MaterializationRequest) -> Result<()> {
        info!(
            "Materialization requested: {} account {} {} {}",
            request.request_id, request.account_id, request.event, request.window
        );
        Ok(())
    }
}

/// Collects requests, for tests.
#[derive(Clone, Default)]
pub struct RecordingMaterializer {
    requests: Arc<Mutex<Vec<MaterializationRequest>>>,
}

impl RecordingMaterializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<MaterializationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Materializer for RecordingMaterializer {
    async fn materialize(&self, request: &MaterializationRequest) -> Result<()> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        Ok(())
    }
}
