//! Best-effort media materialization: turn a remote media reference into an
//! inline `data:` payload, one attempt per message, degrading on failure.

pub mod error;
pub mod fetch;
pub mod materialize;

pub use {
    error::{Error, Result},
    fetch::{HttpFetcher, MediaFetcher},
    materialize::{Materializer, MediaRef},
};
