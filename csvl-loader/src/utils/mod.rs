//! Utility modules for csvl-loader

pub mod retry;

pub use retry::{retry_with, RetryDecision, RetryFailure, RetryPolicy, Retried};
