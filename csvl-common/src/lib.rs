//! # csvl Common Library
//!
//! Shared code for the csvl loader:
//! - Configuration loading (TOML) and config path resolution
//! - Error types
//! - Event types (LoaderEvent) and the EventBus used for progress reporting

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
