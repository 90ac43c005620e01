//! Concurrency cap per marketplace.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::errors::FetchError;
use crate::models::Marketplace;

/// How long a caller may wait for a free slot.
pub const DEFAULT_BULKHEAD_WAIT: Duration = Duration::from_secs(1);

/// Caps in-flight calls to one marketplace across all requests.
#[derive(Debug, Clone)]
pub struct Bulkhead {
    marketplace: Marketplace,
    semaphore: Arc<Semaphore>,
    max_wait: Duration,
}

/// A held bulkhead slot, released on drop.
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

impl Bulkhead {
    pub fn new(marketplace: Marketplace, max_concurrent_calls: u32) -> Self {
        Self::with_wait(marketplace, max_concurrent_calls, DEFAULT_BULKHEAD_WAIT)
    }

    pub fn with_wait(marketplace: Marketplace, max_concurrent_calls: u32, max_wait: Duration) -> Self {
        Self {
            marketplace,
            semaphore: Arc::new(Semaphore::new(max_concurrent_calls as usize)),
            max_wait,
        }
    }

    /// Waits up to the bulkhead wait for a slot.
    pub async fn acquire(&self) -> Result<BulkheadPermit, FetchError> {
        match tokio::time::timeout(self.max_wait, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(BulkheadPermit { _permit: permit }),
            Ok(Err(_closed)) => Err(FetchError::Other(format!(
                "Bulkhead for {} is closed",
                self.marketplace
            ))),
            Err(_elapsed) => Err(FetchError::BulkheadFull(self.marketplace)),
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_when_full_and_releases_on_drop() {
        let bulkhead = Bulkhead::with_wait(Marketplace::Ozon, 2, Duration::from_millis(20));
        let first = bulkhead.acquire().await.unwrap();
        let _second = bulkhead.acquire().await.unwrap();
        assert_eq!(bulkhead.available(), 0);

        let err = bulkhead.acquire().await.unwrap_err();
        assert!(matches!(err, FetchError::BulkheadFull(Marketplace::Ozon)));

        drop(first);
        assert_eq!(bulkhead.available(), 1);
        assert!(bulkhead.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn clones_share_capacity() {
        let bulkhead = Bulkhead::with_wait(Marketplace::Wildberries, 1, Duration::from_millis(10));
        let shared = bulkhead.clone();
        let _held = bulkhead.acquire().await.unwrap();
        assert!(shared.acquire().await.is_err());
    }
}
