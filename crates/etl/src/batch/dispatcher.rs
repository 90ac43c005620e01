//! Routing of type-erased row batches to typed per-table handlers.
//!
//! One streaming pipeline carries rows of every payload kind as
//! [`RawRecord`]s. Each raw table has exactly one handler declaring its row
//! type; dispatch checks the type once per batch and hands the handler a
//! plain `Vec<Row>`.

use std::any::{type_name, TypeId};
use std::collections::HashMap;

use log::debug;

use crate::errors::{ConfigError, EtlError, Result};
use crate::models::{Marketplace, MarketplaceEvent, RawRecord};

/// Where a batch came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchContext {
    pub request_id: String,
    pub account_id: i64,
    pub marketplace: Marketplace,
    pub event: MarketplaceEvent,
    pub raw_table: String,
}

/// Persists batches of one row type.
pub trait BatchHandler: Send + Sync {
    type Row: Send + 'static;

    /// Returns the number of rows persisted.
    fn handle_batch(&self, rows: Vec<Self::Row>, context: &BatchContext) -> Result<usize>;
}

trait ErasedHandler: Send + Sync {
    fn row_type(&self) -> (TypeId, &'static str);
    fn handle(&self, batch: Vec<RawRecord>, context: &BatchContext) -> Result<usize>;
}

struct Typed<H>(H);

impl<H: BatchHandler> ErasedHandler for Typed<H> {
    fn row_type(&self) -> (TypeId, &'static str) {
        (TypeId::of::<H::Row>(), type_name::<H::Row>())
    }

    fn handle(&self, batch: Vec<RawRecord>, context: &BatchContext) -> Result<usize> {
        let mut rows = Vec::with_capacity(batch.len());
        for record in batch {
            match record.downcast::<H::Row>() {
                Ok(row) => rows.push(row),
                Err(other) => {
                    return Err(EtlError::BatchTypeMismatch {
                        raw_table: context.raw_table.clone(),
                        expected: type_name::<H::Row>(),
                        actual: other.type_name(),
                    })
                }
            }
        }
        self.0.handle_batch(rows, context)
    }
}

#[derive(Default)]
pub struct EtlBatchDispatcher {
    handlers: HashMap<String, Box<dyn ErasedHandler>>,
}

impl EtlBatchDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler of a raw table. A second handler for the same
    /// table is a configuration error.
    pub fn register<H: BatchHandler + 'static>(
        &mut self,
        raw_table: impl Into<String>,
        handler: H,
    ) -> std::result::Result<(), ConfigError> {
        let raw_table = raw_table.into();
        if self.handlers.contains_key(&raw_table) {
            return Err(ConfigError::DuplicateBatchHandler(raw_table));
        }
        debug!(
            "Registered batch handler for {} ({})",
            raw_table,
            type_name::<H::Row>()
        );
        self.handlers.insert(raw_table, Box::new(Typed(handler)));
        Ok(())
    }

    pub fn has_handler(&self, raw_table: &str) -> bool {
        self.handlers.contains_key(raw_table)
    }

    /// Forwards `batch` to the handler of `context.raw_table`.
    ///
    /// An empty batch is a no-op. If the rows are not of the handler's type
    /// the whole batch fails and nothing is persisted.
    pub fn dispatch(&self, batch: Vec<RawRecord>, context: &BatchContext) -> Result<usize> {
        let handler = self
            .handlers
            .get(&context.raw_table)
            .ok_or_else(|| EtlError::HandlerNotFound(context.raw_table.clone()))?;
        let Some(first) = batch.first() else {
            return Ok(0);
        };
        let (expected_id, expected_name) = handler.row_type();
        if first.type_id() != expected_id {
            return Err(EtlError::BatchTypeMismatch {
                raw_table: context.raw_table.clone(),
                expected: expected_name,
                actual: first.type_name(),
            });
        }
        handler.handle(batch, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    struct Sale(i64);

    #[derive(Debug)]
    struct Stock;

    #[derive(Clone, Default)]
    struct Recorder {
        batches: Arc<Mutex<Vec<Vec<Sale>>>>,
    }

    impl BatchHandler for Recorder {
        type Row = Sale;

        fn handle_batch(&self, rows: Vec<Sale>, _context: &BatchContext) -> Result<usize> {
            let n = rows.len();
            self.batches.lock().unwrap().push(rows);
            Ok(n)
        }
    }

    fn context(raw_table: &str) -> BatchContext {
        BatchContext {
            request_id: "req".into(),
            account_id: 1,
            marketplace: Marketplace::Wildberries,
            event: MarketplaceEvent::SalesFact,
            raw_table: raw_table.into(),
        }
    }

    #[test]
    fn dispatches_typed_rows() {
        let recorder = Recorder::default();
        let mut dispatcher = EtlBatchDispatcher::new();
        dispatcher.register("raw_wb_sales", recorder.clone()).unwrap();

        let batch = vec![RawRecord::new(Sale(1)), RawRecord::new(Sale(2))];
        assert_eq!(dispatcher.dispatch(batch, &context("raw_wb_sales")).unwrap(), 2);
        assert_eq!(*recorder.batches.lock().unwrap(), vec![vec![Sale(1), Sale(2)]]);
    }

    #[test]
    fn empty_batch_is_a_noop() {
        let recorder = Recorder::default();
        let mut dispatcher = EtlBatchDispatcher::new();
        dispatcher.register("raw_wb_sales", recorder.clone()).unwrap();

        assert_eq!(dispatcher.dispatch(Vec::new(), &context("raw_wb_sales")).unwrap(), 0);
        assert!(recorder.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn type_mismatch_persists_nothing() {
        let recorder = Recorder::default();
        let mut dispatcher = EtlBatchDispatcher::new();
        dispatcher.register("raw_wb_sales", recorder.clone()).unwrap();

        let err = dispatcher
            .dispatch(vec![RawRecord::new(Stock)], &context("raw_wb_sales"))
            .unwrap_err();
        match err {
            EtlError::BatchTypeMismatch { expected, actual, .. } => {
                assert!(expected.ends_with("Sale"));
                assert!(actual.ends_with("Stock"));
            }
            other => panic!("unexpected error {other:?}"),
        }

        let mixed = vec![RawRecord::new(Sale(1)), RawRecord::new(Stock)];
        assert!(dispatcher.dispatch(mixed, &context("raw_wb_sales")).is_err());
        assert!(recorder.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn unknown_table_and_duplicates_fail() {
        let mut dispatcher = EtlBatchDispatcher::new();
        dispatcher.register("raw_wb_sales", Recorder::default()).unwrap();
        assert!(matches!(
            dispatcher.register("raw_wb_sales", Recorder::default()),
            Err(ConfigError::DuplicateBatchHandler(_))
        ));

        let err = dispatcher
            .dispatch(vec![RawRecord::new(Sale(1))], &context("raw_missing"))
            .unwrap_err();
        assert!(err.to_string().contains("raw_missing"));
    }
}
