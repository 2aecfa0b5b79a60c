//! Error types for pinset operations.

use crate::types::ContentId;
use thiserror::Error;

/// Failures reported by the document store, object store or pinning service.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("link '{name}' not found in directory {dir}")]
    LinkNotFound { dir: ContentId, name: String },

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Encoding(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Encoding(err.to_string())
    }
}

/// Errors surfaced by the bucket and the pin coordinator.
#[derive(Debug, Error)]
pub enum PinsetError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("bucket has not been provisioned")]
    NotProvisioned,

    #[error("operation cancelled")]
    Cancelled,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("mutation queue is closed")]
    QueueClosed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for PinsetError {
    fn from(err: config::ConfigError) -> Self {
        PinsetError::Config(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub type Result<T> = std::result::Result<T, PinsetError>;
