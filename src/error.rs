//! Failure kinds a caller needs to tell apart.
//!
//! Everything in the crate returns [`anyhow::Result`]; the variants below are
//! carried inside the `anyhow::Error` and can be recovered with
//! [`anyhow::Error::downcast_ref`] (the binary does this to choose its message).

use std::path::PathBuf;
use thiserror::Error;

/// Fatal conditions of a conversion run.
#[derive(Error, Debug)]
pub enum EtlError {
    /// The log file does not exist or is not a regular file.
    #[error("log file '{}' is not a valid file", .0.display())]
    InputNotFile(PathBuf),

    /// A lookup database could not be opened or has the wrong type.
    #[error("'{}' is not a valid {kind} database: {reason}", .path.display())]
    LookupDatabase {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// The log format string could not be compiled.
    #[error("invalid log format: {0}")]
    InvalidFormat(String),

    /// The output store could not be created or its schema applied.
    #[error("could not create database '{}': {source}", .path.display())]
    StoreCreate {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A batch failed while being written; its transaction was rolled back.
    #[error("batch {batch} failed and was rolled back: {source}")]
    BatchFailed {
        /// 1-based batch number.
        batch: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl EtlError {
    pub fn lookup_database(kind: &'static str, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::LookupDatabase {
            kind,
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn batch_failed(batch: usize, source: anyhow::Error) -> Self {
        Self::BatchFailed {
            batch,
            source: source.into(),
        }
    }
}
