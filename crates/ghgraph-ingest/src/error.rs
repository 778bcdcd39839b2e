//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error talking to the archive or the graph store.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encoding/decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Event decoding error.
    #[error("Decode error: {0}")]
    Decode(#[from] ghgraph_core::Error),

    /// The graph store rejected a request.
    #[error("Store rejected request (status {status}): {message}")]
    Store {
        /// Status code reported by the store.
        status: u16,
        /// Message reported by the store.
        message: String,
    },

    /// A mutation was not attempted because one it depends on failed.
    #[error("Dependency failed: {0}")]
    DependencyFailed(String),

    /// An archive shard could not be fetched.
    #[error("Shard fetch error: {0}")]
    Fetch(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background task panicked or was cancelled.
    #[error("Task error: {0}")]
    Task(String),
}
