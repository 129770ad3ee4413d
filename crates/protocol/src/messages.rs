//! Wire message definitions.
//!
//! Every request and response body exchanged between the client and the
//! storage gateway is defined here and serialized as JSON. Directory paths
//! carry a trailing separator; file and directory names never contain one.

use serde::{Deserialize, Serialize};

/// Name of the cookie carrying the credential.
pub const TOKEN_COOKIE: &str = "token";

/// Query parameter carrying a chunk index.
pub const CHUNK_ID_PARAM: &str = "id";

/// Message returned once an upload has been assembled.
pub const UPLOAD_COMPLETED: &str = "upload completed successfully";

// Filesystem tree

/// One node of the tenant tree.
///
/// `children` is only populated for directories, in directory enumeration
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Last modification time in unix seconds.
    pub modified: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileEntry>,
}

impl FileEntry {
    pub fn file(name: impl Into<String>, size: u64, modified: u64) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size,
            modified,
            children: Vec::new(),
        }
    }

    pub fn directory(name: impl Into<String>, modified: u64, children: Vec<FileEntry>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size: 0,
            modified,
            children,
        }
    }

    /// Finds a direct child by name.
    pub fn child(&self, name: &str) -> Option<&FileEntry> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Walks `segments` down from this entry.
    pub fn descend<S: AsRef<str>>(&self, segments: &[S]) -> Option<&FileEntry> {
        segments
            .iter()
            .try_fold(self, |entry, segment| entry.child(segment.as_ref()))
    }
}

/// Full tenant tree returned by `GET /filesystem/state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateResponse {
    pub info: FileEntry,
}

// Authentication

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub name: String,
    pub password: String,
}

/// Issued credential, returned by login and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    /// Expiry in unix seconds.
    pub expires_at: u64,
    pub root_dir: String,
}

/// Refresh body. The token may instead travel in the cookie or header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateRequest {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub name: String,
    pub root_dir: String,
}

// Filesystem operations

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdRequest {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LsRequest {
    #[serde(default)]
    pub dir_path: String,
}

/// Listing of one directory.
///
/// `empty` is set when the directory has no children, standing in for the
/// "Empty" marker older clients print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LsResponse {
    pub entries: Vec<FileEntry>,
    pub empty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MkdirRequest {
    pub path: String,
    pub dir_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRequest {
    pub dir_path: String,
    pub old_name: String,
    pub new_name: String,
}

/// Body shared by move and copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub src_dir_path: String,
    pub file_name: String,
    pub dest_dir_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub dir_path: String,
    pub file_name: String,
}

/// Result of a mutating filesystem call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathResponse {
    pub path: String,
    pub message: String,
}

/// Plain acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

// Transfers

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartUploadRequest {
    pub location: String,
    pub file_name: String,
    pub chunks_num: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteUploadResponse {
    pub missed_chunks: Vec<usize>,
    pub message: String,
}

impl CompleteUploadResponse {
    pub fn is_complete(&self) -> bool {
        self.missed_chunks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartDownloadRequest {
    pub location: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartDownloadResponse {
    pub chunks_num: usize,
    pub message: String,
}

/// Query string of the chunk endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkQuery {
    pub id: usize,
}

/// Liveness response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
