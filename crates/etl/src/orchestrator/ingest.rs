//! Streams the snapshots of one execution into its raw table.

use std::sync::Arc;

use log::{debug, info};

use crate::batch::{BatchContext, BatchStreamProcessor, EtlBatchDispatcher, RawStore};
use crate::errors::{EtlError, Result};
use crate::models::{ExecutionDescriptor, Snapshot};
use crate::snapshot::{ConcatenatingIterator, SnapshotLayoutRegistry, SnapshotRowIterator};

pub struct SnapshotIngestor {
    dispatcher: Arc<EtlBatchDispatcher>,
    raw_store: Arc<dyn RawStore>,
    layouts: Arc<SnapshotLayoutRegistry>,
    batch_size: usize,
    delete_snapshots: bool,
}

impl SnapshotIngestor {
    pub fn new(
        dispatcher: Arc<EtlBatchDispatcher>,
        raw_store: Arc<dyn RawStore>,
        layouts: Arc<SnapshotLayoutRegistry>,
        batch_size: usize,
        delete_snapshots: bool,
    ) -> Self {
        Self {
            dispatcher,
            raw_store,
            layouts,
            batch_size,
            delete_snapshots,
        }
    }

    /// Ingests every row of `snapshots`, in order, and returns the number of
    /// rows persisted. Runs on the blocking pool since file reads and raw
    /// inserts are synchronous.
    pub async fn ingest(&self, descriptor: &ExecutionDescriptor, snapshots: Vec<Snapshot>) -> Result<u64> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let raw_store = Arc::clone(&self.raw_store);
        let layouts = Arc::clone(&self.layouts);
        let batch_size = self.batch_size;
        let delete_snapshots = self.delete_snapshots;
        let descriptor = descriptor.clone();

        tokio::task::spawn_blocking(move || {
            let result = ingest_blocking(
                &dispatcher,
                raw_store.as_ref(),
                &layouts,
                &descriptor,
                &snapshots,
                batch_size,
                delete_snapshots,
            );
            if delete_snapshots {
                for snapshot in &snapshots {
                    snapshot.discard();
                }
            }
            result
        })
        .await
        .map_err(|e| EtlError::Snapshot(format!("Ingestion task failed: {}", e)))?
    }
}

fn ingest_blocking(
    dispatcher: &EtlBatchDispatcher,
    raw_store: &dyn RawStore,
    layouts: &SnapshotLayoutRegistry,
    descriptor: &ExecutionDescriptor,
    snapshots: &[Snapshot],
    batch_size: usize,
    delete_snapshots: bool,
) -> Result<u64> {
    let Some(first) = snapshots.first() else {
        debug!("No snapshots for {}", descriptor.label());
        return Ok(0);
    };
    let element_type = first.element_type;
    if let Some(other) = snapshots.iter().find(|s| s.element_type != element_type) {
        return Err(EtlError::Snapshot(format!(
            "Snapshots of {} mix element types {} and {}",
            descriptor.label(),
            element_type.name(),
            other.element_type.name()
        )));
    }

    raw_store.ensure_table(&descriptor.raw_table)?;

    let context = BatchContext {
        request_id: descriptor.request_id.clone(),
        account_id: descriptor.account_id,
        marketplace: descriptor.marketplace,
        event: descriptor.event,
        raw_table: descriptor.raw_table.clone(),
    };
    let locator = layouts.resolve(&element_type);
    let rows = ConcatenatingIterator::new(snapshots.iter(), |snapshot: &Snapshot| {
        SnapshotRowIterator::open(snapshot, &locator, delete_snapshots)
    });

    let mut persisted = 0u64;
    let stats = BatchStreamProcessor::process(
        &descriptor.source_id,
        || Some(rows),
        |bytes: Vec<u8>| element_type.decode(&bytes).map(Some),
        |batch| {
            persisted += dispatcher.dispatch(batch, &context)? as u64;
            Ok(())
        },
        batch_size,
    )?;

    info!(
        "Ingested {} rows into {} for {} ({} read, {} dropped, {} snapshots)",
        persisted,
        descriptor.raw_table,
        descriptor.label(),
        stats.read,
        stats.dropped,
        snapshots.len()
    );
    Ok(persisted)
}
