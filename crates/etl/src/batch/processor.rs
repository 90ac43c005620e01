//! Bounded-memory mapping and batching of streamed rows.

use std::fmt::Display;

use log::{debug, warn};

use crate::errors::{EtlError, Result};
use crate::snapshot::{CloseableIterator, LastMarkingIterator};

/// Counters of one processing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Raw items pulled from the stream.
    pub read: u64,
    /// Items that survived mapping and were handed to the sink.
    pub mapped: u64,
    /// Items dropped because mapping failed or filtered them out.
    pub dropped: u64,
    /// Sink invocations.
    pub batches: u64,
}

pub struct BatchStreamProcessor;

impl BatchStreamProcessor {
    /// Streams items from `supplier` through `mapper` into `sink` in batches of
    /// at most `batch_size`.
    ///
    /// A mapper error is logged and the item dropped; `Ok(None)` drops the item
    /// silently. A stream error or sink error aborts the run. The stream is
    /// closed on every exit path. The final partial batch is flushed when the
    /// last item is seen.
    pub fn process<I, S, T, E, Sup, M, K>(
        source: &str,
        supplier: Sup,
        mut mapper: M,
        mut sink: K,
        batch_size: usize,
    ) -> Result<BatchStats>
    where
        I: CloseableIterator<Item = Result<S>>,
        Sup: FnOnce() -> Option<I>,
        M: FnMut(S) -> std::result::Result<Option<T>, E>,
        E: Display,
        K: FnMut(Vec<T>) -> Result<()>,
    {
        if batch_size == 0 {
            return Err(EtlError::InvalidArgument(format!(
                "batch size must be positive for source {}",
                source
            )));
        }
        let stream = supplier().ok_or_else(|| {
            EtlError::InvalidArgument(format!("no stream supplied for source {}", source))
        })?;

        let mut items = LastMarkingIterator::new(stream);
        let outcome = Self::drain(source, &mut items, &mut mapper, &mut sink, batch_size);
        let closed = items.close();
        let stats = outcome?;
        closed?;
        debug!(
            "Processed source {}: read={}, mapped={}, dropped={}, batches={}",
            source, stats.read, stats.mapped, stats.dropped, stats.batches
        );
        Ok(stats)
    }

    fn drain<I, S, T, E, M, K>(
        source: &str,
        items: &mut LastMarkingIterator<I>,
        mapper: &mut M,
        sink: &mut K,
        batch_size: usize,
    ) -> Result<BatchStats>
    where
        I: CloseableIterator<Item = Result<S>>,
        M: FnMut(S) -> std::result::Result<Option<T>, E>,
        E: Display,
        K: FnMut(Vec<T>) -> Result<()>,
    {
        let mut stats = BatchStats::default();
        let mut buffer: Vec<T> = Vec::with_capacity(batch_size);

        for item in items {
            let raw = item.value?;
            stats.read += 1;
            match mapper(raw) {
                Ok(Some(mapped)) => buffer.push(mapped),
                Ok(None) => stats.dropped += 1,
                Err(e) => {
                    stats.dropped += 1;
                    warn!("Dropping row {} of source {}: {}", stats.read, source, e);
                }
            }

            if buffer.len() >= batch_size || (item.last && !buffer.is_empty()) {
                let batch = std::mem::replace(&mut buffer, Vec::with_capacity(batch_size));
                let size = batch.len() as u64;
                sink(batch)?;
                stats.mapped += size;
                stats.batches += 1;
                debug!("Flushed batch of {} rows for source {}", size, source);
            }
        }
        Ok(stats)
    }
}
