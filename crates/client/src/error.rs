//! Error types for the storage client.

use protocol::{ErrorKind, StorageError};
use thiserror::Error;

/// Errors returned by client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with an error status and message.
    #[error("{0}")]
    Api(#[from] StorageError),

    /// The request never produced a response.
    #[error("problem with server connection: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not logged in")]
    NotLoggedIn,

    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("upload still missing chunks {missing:?} after {rounds} rounds")]
    UploadIncomplete { rounds: usize, missing: Vec<usize> },

    #[error("chunk {index} failed after {attempts} attempts")]
    ChunkFailed { index: usize, attempts: usize },
}

impl ClientError {
    /// Kind of a server-side failure, if this is one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Api(err) => Some(err.kind()),
            _ => None,
        }
    }

    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(_) => true,
            ClientError::Api(err) => err.kind() == ErrorKind::Unknown,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
