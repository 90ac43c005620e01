//! Event source trait definitions.

use async_trait::async_trait;

use crate::errors::FetchError;
use crate::models::{EventWindow, MarketplaceEvent, Snapshot};

/// Parameters of one page fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub account_id: i64,
    pub event: MarketplaceEvent,
    pub window: EventWindow,
    /// Continuation token returned by the previous page, if any.
    pub page_token: Option<String>,
}

impl FetchRequest {
    pub fn next_page(&self, token: String) -> Self {
        Self {
            page_token: Some(token),
            ..self.clone()
        }
    }
}

/// A marketplace endpoint that downloads raw payloads to disk.
///
/// Implementations return a [`Snapshot`] pointing at the downloaded file and
/// report throttling through [`FetchError::BackoffRequired`] or an HTTP 429.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_snapshot(&self, request: &FetchRequest) -> Result<Snapshot, FetchError>;
}
