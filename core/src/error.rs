//! Error types for the shuffle stage.
//!
//! Every failure in this crate is fatal to the run. Errors carry the path of
//! the file or directory involved so the top level can report it and abort.

use bulkshuffle_common::CommonError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error types for shuffle operations
#[derive(Error, Debug)]
pub enum ShuffleError {
    /// Relocation, enumeration or open failure on the map-shard tree.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A malformed intermediate file. The stream cannot be skipped safely.
    #[error("Corrupt map output {} at byte {offset}: {message}", path.display())]
    Corrupt {
        path: PathBuf,
        offset: u64,
        message: String,
    },

    #[error("Invalid shuffle configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] CommonError),

    #[error("Output queue closed while shard {shard} was still merging")]
    OutputClosed { shard: usize },

    #[error("Shuffle task failed: {0}")]
    TaskFailed(String),
}

/// Result type for shuffle operations
pub type ShuffleResult<T> = Result<T, ShuffleError>;

impl ShuffleError {
    pub fn io<P: AsRef<Path>>(path: P, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn corrupt<P: AsRef<Path>, S: Into<String>>(path: P, offset: u64, message: S) -> Self {
        Self::Corrupt {
            path: path.as_ref().to_path_buf(),
            offset,
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }
}

impl From<tokio::task::JoinError> for ShuffleError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::TaskFailed(error.to_string())
    }
}
