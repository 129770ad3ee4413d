//! Configuration management for the storage server.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/remote-storage/server.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::ParentAtRoot;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest chunk size accepted by [`Config::validate`] (16 MiB).
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("chunk_size must be between 1 and {MAX_CHUNK_SIZE} bytes, got {0}")]
    InvalidChunkSize(usize),

    #[error("max_chunk_count must be greater than 0")]
    InvalidMaxChunkCount,

    #[error("token_ttl_secs must be greater than 0")]
    InvalidTokenTtl,

    #[error("cleanup_interval_secs must be greater than 0")]
    InvalidCleanupInterval,

    #[error("bind_addr is not a valid socket address: {0}")]
    InvalidBindAddr(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the storage server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Listener and process settings.
    pub server: ServerConfig,

    /// Storage root and transfer limits.
    pub storage: StorageConfig,

    /// Credential issuing.
    pub auth: AuthConfig,

    /// Server-side `cd` behaviour.
    pub navigation: NavigationConfig,

    /// Per-client session lifetime.
    pub sessions: SessionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP gateway listens on.
    pub bind_addr: String,

    /// Directory for server data (storage, key, user database).
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding every tenant root. Defaults to `<data_dir>/storage`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<PathBuf>,

    /// Download chunk size in bytes.
    pub chunk_size: usize,

    /// Upper bound on the chunk count of a single upload.
    pub max_chunk_count: usize,

    /// Largest file a download may materialize in memory.
    pub max_download_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Lifetime of an issued credential.
    pub token_ttl_secs: u64,

    /// Whether an expired (but correctly signed) credential may be refreshed.
    pub allow_expired_refresh: bool,

    /// Ed25519 service key. Defaults to `<data_dir>/service.key`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,

    /// SQLite user directory. Defaults to `<data_dir>/users.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users_db: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct NavigationConfig {
    /// What `cd ..` does at the tenant root.
    pub parent_at_root: ParentAtRoot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionsConfig {
    /// Idle time after which a client session is dropped (0 = never).
    pub idle_timeout_secs: u64,

    /// How often idle sessions are looked for.
    pub cleanup_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            chunk_size: 64 * 1024,
            max_chunk_count: 1_000_000,
            max_download_size: 1024 * 1024 * 1024, // 1GiB
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 300, // 5 minutes
            allow_expired_refresh: true,
            key_path: None,
            users_db: None,
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 0,
            cleanup_interval_secs: 60,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("remote-storage")
        .join("server.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("remote-storage")
}

impl Config {
    /// Directory holding every tenant root.
    pub fn storage_root(&self) -> PathBuf {
        self.storage
            .root_dir
            .clone()
            .unwrap_or_else(|| self.server.data_dir.join("storage"))
    }

    pub fn key_path(&self) -> PathBuf {
        self.auth
            .key_path
            .clone()
            .unwrap_or_else(|| self.server.data_dir.join("service.key"))
    }

    pub fn users_db_path(&self) -> PathBuf {
        self.auth
            .users_db
            .clone()
            .unwrap_or_else(|| self.server.data_dir.join("users.db"))
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.auth.token_ttl_secs)
    }

    /// `None` when sessions never expire.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.sessions.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.cleanup_interval_secs)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - REMOTE_STORAGE_BIND_ADDR: Override listen address
    /// - REMOTE_STORAGE_ROOT_DIR: Override storage root
    /// - REMOTE_STORAGE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("REMOTE_STORAGE_BIND_ADDR") {
            if !addr.is_empty() {
                tracing::info!("Overriding bind_addr from environment: {}", addr);
                self.server.bind_addr = addr;
            }
        }

        if let Ok(root) = std::env::var("REMOTE_STORAGE_ROOT_DIR") {
            if !root.is_empty() {
                tracing::info!("Overriding storage root_dir from environment: {}", root);
                self.storage.root_dir = Some(PathBuf::from(root));
            }
        }

        if let Ok(level) = std::env::var("REMOTE_STORAGE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.server.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chunk_size = self.storage.chunk_size;
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidChunkSize(chunk_size));
        }

        if self.storage.max_chunk_count == 0 {
            return Err(ConfigError::InvalidMaxChunkCount);
        }

        if self.auth.token_ttl_secs == 0 {
            return Err(ConfigError::InvalidTokenTtl);
        }

        if self.sessions.cleanup_interval_secs == 0 {
            return Err(ConfigError::InvalidCleanupInterval);
        }

        if self.server.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddr(self.server.bind_addr.clone()));
        }

        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
