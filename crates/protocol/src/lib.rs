//! # Remote Storage Protocol Library
//!
//! Shared vocabulary of the remote storage server and its client.
//!
//! ## Overview
//!
//! - **Messages**: JSON request/response bodies and the [`FileEntry`] tree
//! - **Errors**: the five-kind failure taxonomy and its status mapping
//! - **Paths**: split/join/normalize and the per-session [`NavigationState`]
//! - **Chunks**: the fixed-size split both ends of a transfer agree on
//! - **Credentials**: Ed25519-signed, time-bounded tokens binding an identity
//!   to its tenant root
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Claims, ServiceKey};
//!
//! let key = ServiceKey::generate();
//! let credential = key
//!     .issue(Claims {
//!         identity: "alice".into(),
//!         tenant_root: "alice/".into(),
//!         session_id: "3f2a".into(),
//!         issued_at: 0,
//!         expires_at: 300,
//!     })
//!     .unwrap();
//!
//! let verified = key.verify(credential.token()).unwrap();
//! assert_eq!(verified.claims().identity, "alice");
//! ```

pub mod chunk;
pub mod crypto;
pub mod error;
pub mod messages;
pub mod path;

pub use chunk::split_chunks;
pub use crypto::{hash_secret, hashes_match, Claims, Credential, ServiceKey, SERVICE_KEY_LENGTH};
pub use error::{classify_io, ErrorBody, ErrorKind, Result, StorageError};
pub use messages::{FileEntry, CHUNK_ID_PARAM, TOKEN_COOKIE, UPLOAD_COMPLETED};
pub use path::{DirectoryLookup, NavigationState, ParentAtRoot};
