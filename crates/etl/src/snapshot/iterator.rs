//! File-backed iteration over downloaded snapshots.
//!
//! At most one snapshot file is open per event: the concatenating iterator
//! opens the next snapshot only after closing the previous one, and every
//! iterator here tolerates repeated `close` calls.

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use log::{debug, warn};

use super::{JsonArrayLocator, JsonStreamReader};
use crate::errors::{EtlError, Result};
use crate::models::{delete_snapshot_file, Snapshot};

/// An iterator holding a resource that must be released explicitly.
pub trait CloseableIterator: Iterator {
    /// Releases the underlying resource. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;
}

/// One element of a sequence plus whether it is the final one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamItem<T> {
    pub value: T,
    pub last: bool,
}

/// Raw elements of one snapshot file, as JSON bytes.
pub struct SnapshotRowIterator {
    reader: Option<JsonStreamReader<BufReader<File>>>,
    path: PathBuf,
    delete_on_close: bool,
    failed: bool,
}

impl SnapshotRowIterator {
    /// Opens the snapshot file and positions it on the payload array.
    ///
    /// If positioning fails the file is closed (and deleted when
    /// `delete_on_close` is set) before the error is returned.
    pub fn open(snapshot: &Snapshot, locator: &JsonArrayLocator, delete_on_close: bool) -> Result<Self> {
        let file = File::open(&snapshot.file_path).map_err(|e| {
            EtlError::Snapshot(format!(
                "Failed to open snapshot {}: {}",
                snapshot.file_path.display(),
                e
            ))
        })?;
        let mut iter = Self {
            reader: Some(JsonStreamReader::new(BufReader::new(file))),
            path: snapshot.file_path.clone(),
            delete_on_close,
            failed: false,
        };
        let located = match iter.reader.as_mut() {
            Some(reader) => locator.locate(reader),
            None => Ok(()),
        };
        if let Err(e) = located {
            iter.close()?;
            return Err(e);
        }
        debug!("Opened snapshot {} at '{}'", iter.path.display(), locator);
        Ok(iter)
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }
}

impl Iterator for SnapshotRowIterator {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let reader = self.reader.as_mut()?;
        match reader.next_element() {
            Ok(element) => element.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(EtlError::Snapshot(format!(
                    "{} in {}",
                    e,
                    self.path.display()
                ))))
            }
        }
    }
}

impl CloseableIterator for SnapshotRowIterator {
    fn close(&mut self) -> Result<()> {
        if self.reader.take().is_none() {
            return Ok(());
        }
        if self.delete_on_close {
            delete_snapshot_file(&self.path);
        }
        Ok(())
    }
}

impl Drop for SnapshotRowIterator {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close snapshot {}: {}", self.path.display(), e);
        }
    }
}

/// Presents several lazily-opened closeable iterators as one sequence.
///
/// Sources are opened in order, one at a time. Exhausted iterators are closed
/// before the next source is opened; a close failure is logged and iteration
/// continues. An open failure is yielded once as an error and ends the
/// sequence.
pub struct ConcatenatingIterator<S, C, F> {
    pending: VecDeque<S>,
    open: F,
    current: Option<C>,
    done: bool,
}

impl<S, C, T, F> ConcatenatingIterator<S, C, F>
where
    C: CloseableIterator<Item = Result<T>>,
    F: FnMut(S) -> Result<C>,
{
    pub fn new(sources: impl IntoIterator<Item = S>, open: F) -> Self {
        Self {
            pending: sources.into_iter().collect(),
            open,
            current: None,
            done: false,
        }
    }

    fn close_current(&mut self) -> Result<()> {
        match self.current.take() {
            Some(mut current) => current.close(),
            None => Ok(()),
        }
    }
}

impl<S, C, T, F> Iterator for ConcatenatingIterator<S, C, F>
where
    C: CloseableIterator<Item = Result<T>>,
    F: FnMut(S) -> Result<C>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(current) = self.current.as_mut() {
                if let Some(item) = current.next() {
                    return Some(item);
                }
                if let Err(e) = self.close_current() {
                    warn!("Failed to close exhausted snapshot iterator: {}", e);
                }
                continue;
            }
            let source = match self.pending.pop_front() {
                Some(source) => source,
                None => {
                    self.done = true;
                    return None;
                }
            };
            match (self.open)(source) {
                Ok(opened) => self.current = Some(opened),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<S, C, T, F> CloseableIterator for ConcatenatingIterator<S, C, F>
where
    C: CloseableIterator<Item = Result<T>>,
    F: FnMut(S) -> Result<C>,
{
    fn close(&mut self) -> Result<()> {
        self.done = true;
        self.pending.clear();
        self.close_current()
    }
}

/// Wraps a sequence with one-element look-ahead so each item knows whether it
/// is the final one.
pub struct LastMarkingIterator<I: Iterator> {
    inner: I,
    lookahead: Option<I::Item>,
    primed: bool,
}

impl<I: Iterator> LastMarkingIterator<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            lookahead: None,
            primed: false,
        }
    }
}

impl<I: Iterator> Iterator for LastMarkingIterator<I> {
    type Item = StreamItem<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.primed {
            self.lookahead = self.inner.next();
            self.primed = true;
        }
        let value = self.lookahead.take()?;
        self.lookahead = self.inner.next();
        Some(StreamItem {
            value,
            last: self.lookahead.is_none(),
        })
    }
}

impl<I: CloseableIterator> CloseableIterator for LastMarkingIterator<I> {
    fn close(&mut self) -> Result<()> {
        self.lookahead = None;
        self.primed = true;
        self.inner.close()
    }
}
