//! Error types for csvl-loader
//!
//! Only setup-class failures are represented here. Per-record failures never
//! become a `LoaderError`; they end up as `Failure` outcomes in the ledger.

use crate::services::field_mapper::MapError;
use crate::services::remote_client::RemoteError;
use thiserror::Error;

/// Errors that abort a whole run
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Mapping table is malformed or produced an invalid document
    #[error("Mapping error: {0}")]
    Mapping(#[from] MapError),

    /// A JSON Schema could not be compiled
    #[error("Schema error in {name}: {message}")]
    Schema { name: String, message: String },

    /// The CSV input could not be tokenized
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The scoping project could not be established
    #[error("Failed to establish project '{project}': {source}")]
    Setup {
        project: String,
        #[source]
        source: RemoteError,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// csvl-common error
    #[error(transparent)]
    Common(#[from] csvl_common::Error),
}

/// Result type for run-level operations
pub type LoaderResult<T> = Result<T, LoaderError>;
