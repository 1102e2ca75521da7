//! Shared failure type for the document store, config and file helpers
//!
//! Pipeline crates wrap this in their own error enums; the HTTP layer maps
//! `NotFound` to 404 and `InvalidInput` to 400.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// SQLite query or pool failure in the document store
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Manifest, artifact, blob or config file access failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored JSON column (feature bag, params, job result) did not parse
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unreadable TOML or a setting outside its allowed range
    #[error("Configuration error: {0}")]
    Config(String),

    /// Job, run, blob key or manifest does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller-supplied value rejected (object key, date, limit)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored row in an unexpected shape, or a background task died
    #[error("Internal error: {0}")]
    Internal(String),
}
