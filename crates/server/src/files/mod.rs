//! Tenant filesystem and chunked transfers.
//!
//! This module provides the storage side of every client operation:
//! - Tenant-confined directory operations and tree traversal
//! - Resumable chunked uploads assembled in index order
//! - Chunked downloads served from an in-memory copy
//!
//! # Security
//!
//! Every path is resolved under the tenant root. `..` segments are resolved
//! lexically and may not climb above the root, and resolved paths are
//! canonicalized so symlinks cannot point the operation elsewhere.

pub mod tenant;
pub mod transfer;

pub use tenant::TenantFilesystem;
pub use transfer::{
    DownloadSession, TransferLimits, UploadOutcome, UploadPhase, UploadSession, TEMP_DIR_SUFFIX,
};
