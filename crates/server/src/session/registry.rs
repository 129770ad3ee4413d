//! Registry of client sessions keyed by login session id.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use protocol::{path as wire_path, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::client::ClientSession;
use crate::auth::TokenIdentity;
use crate::files::TenantFilesystem;

/// Thread-safe session registry using DashMap.
///
/// Sessions are created lazily on the first authenticated request of a login
/// and live until logout, idle eviction or shutdown. Two logins of the same
/// identity never share navigation or transfer state.
pub struct SessionRegistry {
    storage_root: PathBuf,
    sessions: DashMap<String, Arc<ClientSession>>,
}

impl SessionRegistry {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            sessions: DashMap::new(),
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Host directory of a tenant root given relative to the storage root.
    pub fn tenant_path(&self, tenant_root: &str) -> Result<PathBuf> {
        let segments = wire_path::normalize(tenant_root)?;
        Ok(segments
            .iter()
            .fold(self.storage_root.clone(), |path, segment| path.join(segment)))
    }

    /// Returns the session of the login behind `identity`, opening it if
    /// needed.
    pub fn open(&self, identity: &TokenIdentity) -> Result<Arc<ClientSession>> {
        if let Some(existing) = self.sessions.get(&identity.session_id) {
            if existing.tenant_root() == identity.tenant_root {
                existing.touch();
                return Ok(Arc::clone(existing.value()));
            }
        }

        let filesystem = TenantFilesystem::open(self.tenant_path(&identity.tenant_root)?)?;
        let session = Arc::new(ClientSession::new(
            &identity.identity,
            &identity.tenant_root,
            Arc::new(filesystem),
        ));

        match self.sessions.entry(identity.session_id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().tenant_root() == identity.tenant_root {
                    entry.get().touch();
                    return Ok(Arc::clone(entry.get()));
                }
                let stale = entry.insert(Arc::clone(&session));
                stale.close();
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&session));
            }
        }

        info!(
            identity = %identity.identity,
            session = %identity.session_id,
            root = %identity.tenant_root,
            "Session opened"
        );
        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.get(session_id).map(|s| Arc::clone(s.value()))
    }

    /// Removes and closes one session.
    pub fn remove(&self, session_id: &str) -> bool {
        match self.sessions.remove(session_id) {
            Some((_, session)) => {
                session.close();
                info!(identity = %session.identity(), session = %session_id, "Session closed");
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Closes sessions idle for at least `timeout` as of `now`.
    pub fn evict_idle(&self, timeout: Duration, now: Instant) -> usize {
        let idle: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for(now) >= timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for session_id in idle {
            if let Some((session_id, session)) = self.sessions.remove(&session_id) {
                session.close();
                evicted += 1;
                info!(identity = %session.identity(), session = %session_id, "Evicted idle session");
            }
        }
        evicted
    }

    /// Closes every session.
    pub fn close_all(&self) {
        let session_ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for session_id in session_ids {
            self.remove(&session_id);
        }
    }

    /// Starts a background task that periodically evicts idle sessions.
    ///
    /// Without an idle timeout nothing is ever evicted and no task is
    /// spawned.
    pub fn start_cleanup_task(
        self: &Arc<Self>,
        interval: Duration,
        idle_timeout: Option<Duration>,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let timeout = idle_timeout?;
        let registry = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Session cleanup task stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        registry.evict_idle(timeout, Instant::now());
                    }
                }
            }
        }))
    }
}
