//! Credential issuing, refresh and validation.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result as AnyResult};
use protocol::{hash_secret, hashes_match, Claims, Credential, Result, ServiceKey, StorageError};
use tracing::{debug, info, warn};

use super::users::UserDirectory;

/// Source of the current time in unix seconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Wall clock.
pub fn system_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    })
}

/// Identity, tenant root and login session carried by a valid credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    pub identity: String,
    pub tenant_root: String,
    pub session_id: String,
    pub expires_at: u64,
}

impl From<&Claims> for TokenIdentity {
    fn from(claims: &Claims) -> Self {
        Self {
            identity: claims.identity.clone(),
            tenant_root: claims.tenant_root.clone(),
            session_id: claims.session_id.clone(),
            expires_at: claims.expires_at,
        }
    }
}

/// Issues and checks credentials against a user directory.
#[derive(Clone)]
pub struct TokenService {
    key: ServiceKey,
    users: Arc<dyn UserDirectory>,
    ttl: Duration,
    allow_expired_refresh: bool,
    clock: Clock,
}

impl TokenService {
    pub fn new(key: ServiceKey, users: Arc<dyn UserDirectory>, ttl: Duration) -> Self {
        Self {
            key,
            users,
            ttl,
            allow_expired_refresh: true,
            clock: system_clock(),
        }
    }

    /// Whether correctly signed but expired credentials may be refreshed.
    pub fn allow_expired_refresh(mut self, allow: bool) -> Self {
        self.allow_expired_refresh = allow;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }

    fn issue(&self, identity: &str, tenant_root: &str, session_id: &str) -> Result<Credential> {
        let issued_at = self.now();
        self.key.issue(Claims {
            identity: identity.to_string(),
            tenant_root: tenant_root.to_string(),
            session_id: session_id.to_string(),
            issued_at,
            expires_at: issued_at.saturating_add(self.ttl.as_secs()),
        })
    }

    /// Checks `password` for `identity` and issues a credential.
    ///
    /// Unknown identities and wrong passwords produce the same error.
    pub fn login(&self, identity: &str, password: &str) -> Result<Credential> {
        let record = self.users.find(identity).map_err(|e| {
            warn!(error = %e, "User directory lookup failed");
            StorageError::unknown("user directory unavailable")
        })?;

        let Some(record) = record else {
            debug!(identity = %identity, "Login for unknown identity");
            return Err(StorageError::wrong_credentials());
        };
        if !hashes_match(&record.secret_hash, &hash_secret(password, identity)) {
            debug!(identity = %identity, "Login with wrong password");
            return Err(StorageError::wrong_credentials());
        }

        let session_id = uuid::Uuid::new_v4().simple().to_string();
        let credential = self.issue(&record.identity, &record.root_directory, &session_id)?;
        info!(identity = %identity, session = %session_id, "Credential issued");
        Ok(credential)
    }

    /// Issues a fresh credential for the same identity, root and session.
    pub fn refresh(&self, token: &str) -> Result<Credential> {
        let current = self.key.verify(token)?;
        let claims = current.claims();
        if !self.allow_expired_refresh && claims.is_expired(self.now()) {
            debug!(identity = %claims.identity, "Refusing to refresh an expired credential");
            return Err(StorageError::wrong_credentials());
        }
        let credential = self.issue(&claims.identity, &claims.tenant_root, &claims.session_id)?;
        debug!(identity = %claims.identity, "Credential refreshed");
        Ok(credential)
    }

    /// Checks signature and expiry.
    pub fn validate(&self, token: &str) -> Result<TokenIdentity> {
        let credential = self.key.verify(token)?;
        if credential.claims().is_expired(self.now()) {
            return Err(StorageError::wrong_credentials());
        }
        Ok(TokenIdentity::from(credential.claims()))
    }
}

/// Loads the service key from `path`, generating and saving one if the file
/// does not exist.
pub fn load_or_generate_key(path: &Path) -> AnyResult<ServiceKey> {
    if path.exists() {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read service key: {}", path.display()))?;
        let key = ServiceKey::from_slice(&bytes)
            .map_err(|e| anyhow::anyhow!("Invalid service key {}: {}", path.display(), e))?;
        Ok(key)
    } else {
        let key = ServiceKey::generate();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(path, key.secret_bytes())
            .with_context(|| format!("Failed to write service key: {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to restrict service key: {}", path.display()))?;
        }

        info!(fingerprint = %key.fingerprint(), "Generated new service key and saved to {:?}", path);
        Ok(key)
    }
}
