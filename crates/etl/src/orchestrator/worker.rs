//! Runs one attempt of one execution: paged fetch under the marketplace
//! guards, then ingestion.

use std::sync::Arc;

use log::{debug, warn};

use super::SnapshotIngestor;
use crate::errors::{EtlError, FetchError, Result};
use crate::models::{ExecutionDescriptor, Snapshot};
use crate::resilience::{MarketplaceGuards, ResilienceFactory};
use crate::source::{FetchRequest, RegisteredSource, SourceRegistry};

pub struct ExecutionWorker {
    sources: Arc<SourceRegistry>,
    resilience: Arc<ResilienceFactory>,
    ingestor: Arc<SnapshotIngestor>,
    max_pages: usize,
}

impl ExecutionWorker {
    pub fn new(
        sources: Arc<SourceRegistry>,
        resilience: Arc<ResilienceFactory>,
        ingestor: Arc<SnapshotIngestor>,
        max_pages: usize,
    ) -> Self {
        Self {
            sources,
            resilience,
            ingestor,
            max_pages,
        }
    }

    pub fn resilience(&self) -> &ResilienceFactory {
        &self.resilience
    }

    /// Fetches and ingests the execution. Returns the number of rows persisted.
    pub async fn run(&self, descriptor: &ExecutionDescriptor) -> Result<u64> {
        let source = self
            .sources
            .find(descriptor.event, &descriptor.source_id)
            .ok_or_else(|| {
                EtlError::InvalidArgument(format!(
                    "Source {} is not registered for event {}",
                    descriptor.source_id, descriptor.event
                ))
            })?;
        let guards = self.resilience.guards(descriptor.marketplace)?;

        let snapshots = self.fetch_pages(source, &guards, descriptor).await?;
        self.ingestor.ingest(descriptor, snapshots).await
    }

    /// Downloads every page, holding one bulkhead slot for the whole
    /// execution and taking one rate-limiter permit per page. Pages already
    /// on disk are discarded when a later page fails.
    async fn fetch_pages(
        &self,
        source: &RegisteredSource,
        guards: &MarketplaceGuards,
        descriptor: &ExecutionDescriptor,
    ) -> Result<Vec<Snapshot>> {
        let _permit = guards.bulkhead.acquire().await?;

        let mut request = FetchRequest {
            account_id: descriptor.account_id,
            event: descriptor.event,
            window: descriptor.window,
            page_token: None,
        };
        let mut snapshots: Vec<Snapshot> = Vec::new();
        loop {
            if snapshots.len() >= self.max_pages {
                discard_all(&snapshots);
                return Err(FetchError::Other(format!(
                    "{} exceeded {} pages",
                    descriptor.label(),
                    self.max_pages
                ))
                .into());
            }

            let page = match guards.rate_limiter.acquire().await {
                Ok(()) => source.fetcher.fetch_snapshot(&request).await,
                Err(e) => Err(e),
            };
            let snapshot = match page {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    if !snapshots.is_empty() {
                        warn!(
                            "Page {} of {} failed, discarding {} downloaded pages",
                            snapshots.len() + 1,
                            descriptor.label(),
                            snapshots.len()
                        );
                    }
                    discard_all(&snapshots);
                    return Err(e.into());
                }
            };

            let next_token = snapshot.next_token.clone();
            snapshots.push(snapshot);
            match next_token {
                Some(token) => {
                    debug!("{} continues with page {}", descriptor.label(), snapshots.len() + 1);
                    request = request.next_page(token);
                }
                None => return Ok(snapshots),
            }
        }
    }
}

fn discard_all(snapshots: &[Snapshot]) {
    for snapshot in snapshots {
        snapshot.discard();
    }
}
