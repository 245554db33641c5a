//! Common error types for csvl

use thiserror::Error;

/// Common result type for csvl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the loader and its configuration layer
#[derive(Error, Debug)]
pub enum Error {
    /// TOML configuration could not be parsed
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
