//! Streaming access to downloaded snapshot files.

mod iterator;
mod layout;
mod locator;
mod reader;

pub use iterator::{
    CloseableIterator, ConcatenatingIterator, LastMarkingIterator, SnapshotRowIterator, StreamItem,
};
pub use layout::SnapshotLayoutRegistry;
pub use locator::JsonArrayLocator;
pub use reader::JsonStreamReader;
