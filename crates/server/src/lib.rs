//! # Remote Storage Server Library
//!
//! Multi-tenant file storage behind a narrow HTTP API.
//!
//! ## Overview
//!
//! - **Tenant filesystem**: every path is confined to the caller's root
//! - **Chunked transfers**: resumable uploads and idempotent chunk downloads
//! - **Credentials**: Ed25519-signed tokens issued against a user directory
//! - **Sessions**: per-identity navigation and transfer state with optional
//!   idle eviction
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │   HTTP gateway (axum, auth middleware)       │
//! ├──────────────────────────────────────────────┤
//! │   LoggingService<FileService>                │
//! ├──────────────────────┬───────────────────────┤
//! │   SessionRegistry    │   TokenService        │
//! ├──────────────────────┼───────────────────────┤
//! │   TenantFilesystem   │   UserDirectory       │
//! │   Upload/Download    │   (SQLite)            │
//! └──────────────────────┴───────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use server::{auth, build_state, gateway, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let users = Arc::new(auth::SqliteUserDirectory::open(config.users_db_path())?);
//!     let key = auth::load_or_generate_key(&config.key_path())?;
//!
//!     let state = build_state(&config, users, key);
//!     let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
//!     gateway::serve(listener, gateway::router(state), Default::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod files;
pub mod gateway;
pub mod service;
pub mod session;

use std::sync::Arc;

pub use config::{Config, ConfigError};
pub use gateway::AppState;
pub use service::{FileService, LoggingService, RequestContext, StorageService};

use auth::{TokenService, UserDirectory};
use files::TransferLimits;
use protocol::ServiceKey;
use session::SessionRegistry;

/// Transfer limits taken from the `[storage]` section.
pub fn transfer_limits(config: &Config) -> TransferLimits {
    TransferLimits {
        chunk_size: config.storage.chunk_size,
        max_chunk_count: config.storage.max_chunk_count,
        max_download_size: config.storage.max_download_size,
    }
}

/// Wires the token service, session registry and logged file service.
pub fn build_state(config: &Config, users: Arc<dyn UserDirectory>, key: ServiceKey) -> AppState {
    let tokens = TokenService::new(key, users, config.token_ttl())
        .allow_expired_refresh(config.auth.allow_expired_refresh);
    let sessions = Arc::new(SessionRegistry::new(config.storage_root()));
    let service = LoggingService::new(FileService::new(
        transfer_limits(config),
        config.navigation.parent_at_root,
    ));
    AppState::new(tokens, sessions, service)
}
