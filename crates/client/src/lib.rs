//! # Remote Storage Client Library
//!
//! HTTP client for the remote storage gateway, with resumable transfers and
//! an interactive shell.
//!
//! ## Overview
//!
//! - **API**: [`StorageClient`] wraps every gateway endpoint
//! - **Transfers**: [`transfer::upload_file`] resends missing chunks until the
//!   server reports completion; downloads retry individual chunks
//! - **Refresh**: [`TokenRefresher`] keeps the credential fresh in the
//!   background
//! - **Browser**: [`RemoteBrowser`] navigates the cached tenant tree
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use client::{StorageClient, TokenRefresher, DEFAULT_REFRESH_MARGIN};
//!
//! # async fn run() -> client::Result<()> {
//! let client = StorageClient::new("http://localhost:8080")?;
//! client.login("alice", "wonderland").await?;
//! let refresher = TokenRefresher::start(client.clone(), DEFAULT_REFRESH_MARGIN);
//!
//! client.mkdir("/", "docs").await?;
//! let listing = client.ls("/").await?;
//! assert!(!listing.empty);
//!
//! refresher.stop().await;
//! client.logout().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod browser;
pub mod commands;
pub mod error;
pub mod refresh;
pub mod transfer;

pub use api::{SessionToken, StorageClient};
pub use browser::RemoteBrowser;
pub use commands::{Command, Flow, ParseError, Shell};
pub use error::{ClientError, Result};
pub use refresh::{TokenRefresher, DEFAULT_REFRESH_MARGIN};
pub use transfer::{TransferOptions, DEFAULT_CHUNK_SIZE};
