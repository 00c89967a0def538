use std::fmt;
use thiserror::Error;

use crate::sync::item::SourceType;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to read pending items from {source_type} adapter: {message}")]
    AdapterRead {
        source_type: SourceType,
        message: String,
    },

    #[error("Push failed for {source_type}: {message}")]
    Push {
        source_type: SourceType,
        message: String,
    },

    #[error("Batch attempt {attempt} failed: {message}")]
    BatchAttempt { attempt: u32, message: String },

    #[error("Batch failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Sync run failed at batch {batch}/{total}: {message}")]
    RunFailed {
        batch: usize,
        total: usize,
        message: String,
    },

    #[error("A sync run is already in progress")]
    AlreadyRunning,

    #[error("Sync run cancelled after {completed}/{total} batches")]
    Cancelled { completed: usize, total: usize },

    #[error("Remote write error: {0}")]
    Remote(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Remote(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Other(format!("JSON error: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
