//! Event sources and their registration.

mod registry;
mod traits;

pub use registry::{RegisteredSource, SourceRegistry};
pub use traits::{EventSource, FetchRequest};
