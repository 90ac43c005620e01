//! HTTP-backed event sources.

mod http;

pub use http::{
    DownloadedBody, EndpointSpec, HttpEventSource, HttpSnapshotFetcher, PageTokenSource,
    RequestShape,
};
