//! Error taxonomy shared by the server, the client and the wire format.
//!
//! Every failure a storage operation can report collapses into one of five
//! [`ErrorKind`]s. The kind decides the transport status, the message carries
//! the human-readable detail.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a storage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A path, file, session or identity does not exist.
    NotFound,
    /// The target of a create/rename/move/copy already exists.
    AlreadyExists,
    /// Authentication failed. Never says which part of the credential was wrong.
    WrongCredentials,
    /// The request itself is malformed or out of range.
    BadRequest,
    /// Anything that could not be classified.
    Unknown,
}

impl ErrorKind {
    /// HTTP status code used when this kind crosses the transport boundary.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyExists | ErrorKind::BadRequest => 400,
            ErrorKind::WrongCredentials => 401,
            ErrorKind::Unknown => 500,
        }
    }

    /// Best-effort inverse of [`status_code`](Self::status_code). A 400 is
    /// always `BadRequest`; [`StorageError::from_response`] uses the body's
    /// `kind` to tell `AlreadyExists` apart.
    pub fn from_status_code(status: u16) -> Self {
        match status {
            404 => ErrorKind::NotFound,
            400 => ErrorKind::BadRequest,
            401 | 403 => ErrorKind::WrongCredentials,
            _ => ErrorKind::Unknown,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::WrongCredentials => "wrong credentials",
            ErrorKind::BadRequest => "bad request",
            ErrorKind::Unknown => "unknown error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified storage failure with a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StorageError {
    kind: ErrorKind,
    message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    /// The single message every authentication failure carries.
    pub fn wrong_credentials() -> Self {
        Self::new(ErrorKind::WrongCredentials, "wrong credentials")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Classifies an I/O error, prefixing the message with `context`.
    pub fn from_io(err: &std::io::Error, context: impl fmt::Display) -> Self {
        Self::new(classify_io(err), format!("{context}: {err}"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Body sent to the client: `{"error": "<message>", "kind": "<kind>"}`.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.message.clone(),
            kind: Some(self.kind),
        }
    }

    /// Rebuilds the error behind a non-success response.
    ///
    /// The body's `kind` wins over the status. Bodies that are not an
    /// [`ErrorBody`] become the message as they are.
    pub fn from_response(status: u16, body: &str) -> Self {
        let fallback = ErrorKind::from_status_code(status);
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(body) => Self::new(body.kind.unwrap_or(fallback), body.error),
            Err(_) if body.trim().is_empty() => Self::new(fallback, format!("HTTP status {status}")),
            Err(_) => Self::new(fallback, body),
        }
    }
}

/// Maps an I/O error kind onto the storage taxonomy.
pub fn classify_io(err: &std::io::Error) -> ErrorKind {
    use std::io::ErrorKind as Io;
    match err.kind() {
        Io::NotFound => ErrorKind::NotFound,
        Io::AlreadyExists => ErrorKind::AlreadyExists,
        Io::InvalidInput | Io::InvalidData => ErrorKind::BadRequest,
        _ => ErrorKind::Unknown,
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::new(classify_io(&err), err.to_string())
    }
}

/// JSON error body returned with every non-success status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    /// Absent in bodies from older servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
