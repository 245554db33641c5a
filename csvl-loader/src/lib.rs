//! csvl-loader library
//!
//! Reads tabular records, maps them onto nested resource documents and
//! applies those documents to a remote resource store with bounded
//! concurrency, per-call retry and per-record failure isolation.

pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{LoaderError, LoaderResult};
