//! Authentication: tenant records and signed credentials.

pub mod token;
pub mod users;

pub use token::{load_or_generate_key, system_clock, Clock, TokenIdentity, TokenService};
pub use users::{
    normalize_root, tenant_root_for, DirectoryError, MemoryUserDirectory, SqliteUserDirectory,
    TenantRecord, UserDirectory,
};
