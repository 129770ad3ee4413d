//! Tenant records and the user directories that store them.
//!
//! The SQLite directory is the persistent store used by the server binary;
//! the in-memory one backs tests and embedders that manage users themselves.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use protocol::hash_secret;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

/// Errors raised by a user directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Invalid database path.
    #[error("Invalid database path: {0}")]
    InvalidPath(String),

    /// A user with this name already exists.
    #[error("user {0} already exists")]
    UserExists(String),

    /// A tenant root that cannot be used.
    #[error("invalid tenant root: {0}")]
    InvalidRoot(String),

    /// Lock poisoned during operation.
    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// One tenant as the user directory knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantRecord {
    pub identity: String,
    /// Root directory, relative to the server storage root.
    pub root_directory: String,
    /// See [`protocol::hash_secret`].
    pub secret_hash: String,
}

impl TenantRecord {
    /// Builds a record, hashing `password` for storage.
    pub fn new(identity: &str, root_directory: &str, password: &str) -> Self {
        Self {
            identity: identity.to_string(),
            root_directory: normalize_root(root_directory),
            secret_hash: hash_secret(password, identity),
        }
    }
}

/// Stores tenant roots as `name/`, relative and with one trailing separator.
pub fn normalize_root(root: &str) -> String {
    let trimmed = root.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Root for a new tenant: `root` when given, otherwise the identity.
///
/// Only an explicit root may name the whole storage root.
pub fn tenant_root_for(identity: &str, root: Option<&str>) -> DirectoryResult<String> {
    if let Some(root) = root {
        return Ok(normalize_root(root));
    }
    let derived = normalize_root(identity);
    if derived.is_empty() {
        return Err(DirectoryError::InvalidRoot(format!(
            "user name {identity:?} gives an empty root, pass --root to confirm"
        )));
    }
    Ok(derived)
}

/// Read access to tenant records.
pub trait UserDirectory: Send + Sync {
    /// Looks up a tenant by identity.
    fn find(&self, identity: &str) -> DirectoryResult<Option<TenantRecord>>;
}

/// Current schema version.
#[cfg(test)]
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// User directory persisted in SQLite.
pub struct SqliteUserDirectory {
    conn: Mutex<Connection>,
}

impl SqliteUserDirectory {
    /// Open or create a database at the given path, applying migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> DirectoryResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DirectoryError::InvalidPath(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> DirectoryResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> DirectoryResult<Self> {
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> DirectoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DirectoryError::LockPoisoned("user database"))
    }

    /// Get the current schema version.
    pub fn schema_version(&self) -> DirectoryResult<i32> {
        let version = self
            .conn()?
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(version)
    }

    /// Adds a user. Fails if the name is taken.
    pub fn add_user(&self, record: &TenantRecord) -> DirectoryResult<()> {
        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO users (name, root_directory, hashed_password) VALUES (?1, ?2, ?3)",
            params![record.identity, record.root_directory, record.secret_hash],
        )?;
        if inserted == 0 {
            return Err(DirectoryError::UserExists(record.identity.clone()));
        }
        Ok(())
    }

    /// Removes a user. Returns whether a row was deleted.
    pub fn remove_user(&self, identity: &str) -> DirectoryResult<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM users WHERE name = ?1", params![identity])?;
        Ok(removed > 0)
    }

    /// All users ordered by name.
    pub fn list_users(&self) -> DirectoryResult<Vec<TenantRecord>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT name, root_directory, hashed_password FROM users ORDER BY name")?;
        let rows = stmt.query_map([], row_to_record)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

impl UserDirectory for SqliteUserDirectory {
    fn find(&self, identity: &str) -> DirectoryResult<Option<TenantRecord>> {
        let record = self
            .conn()?
            .query_row(
                "SELECT name, root_directory, hashed_password FROM users WHERE name = ?1",
                params![identity],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TenantRecord> {
    Ok(TenantRecord {
        identity: row.get(0)?,
        root_directory: row.get(1)?,
        secret_hash: row.get(2)?,
    })
}

fn run_migrations(conn: &mut Connection) -> DirectoryResult<()> {
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current_version < 1 {
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                name TEXT PRIMARY KEY,
                root_directory TEXT NOT NULL,
                hashed_password TEXT NOT NULL
            )
            "#,
            [],
        )?;
        tx.execute("PRAGMA user_version = 1", [])?;
        tx.commit()?;
    }

    Ok(())
}

/// User directory held in memory.
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, TenantRecord>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a record.
    pub fn insert(&self, record: TenantRecord) {
        if let Ok(mut users) = self.users.write() {
            users.insert(record.identity.clone(), record);
        }
    }

    /// Convenience builder for tests: `with_user("alice", "alice/", "pw")`.
    pub fn with_user(self, identity: &str, root_directory: &str, password: &str) -> Self {
        self.insert(TenantRecord::new(identity, root_directory, password));
        self
    }
}

impl UserDirectory for MemoryUserDirectory {
    fn find(&self, identity: &str) -> DirectoryResult<Option<TenantRecord>> {
        let users = self
            .users
            .read()
            .map_err(|_| DirectoryError::LockPoisoned("user map"))?;
        Ok(users.get(identity).cloned())
    }
}
