//! Per-client state: navigation position and in-flight transfers.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use protocol::{NavigationState, Result, StorageError};
use tracing::debug;

use crate::files::{DownloadSession, TenantFilesystem, UploadSession};

/// Everything the server keeps for one authenticated client.
#[derive(Debug)]
pub struct ClientSession {
    identity: String,
    tenant_root: String,
    filesystem: Arc<TenantFilesystem>,
    navigation: Mutex<NavigationState>,
    upload: RwLock<Option<Arc<UploadSession>>>,
    download: RwLock<Option<Arc<DownloadSession>>>,
    last_activity: Mutex<Instant>,
}

impl ClientSession {
    pub fn new(identity: &str, tenant_root: &str, filesystem: Arc<TenantFilesystem>) -> Self {
        Self {
            identity: identity.to_string(),
            tenant_root: tenant_root.to_string(),
            filesystem,
            navigation: Mutex::new(NavigationState::new()),
            upload: RwLock::new(None),
            download: RwLock::new(None),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn tenant_root(&self) -> &str {
        &self.tenant_root
    }

    pub fn filesystem(&self) -> &Arc<TenantFilesystem> {
        &self.filesystem
    }

    /// Exclusive access to the navigation state.
    pub fn navigation(&self) -> Result<MutexGuard<'_, NavigationState>> {
        self.navigation
            .lock()
            .map_err(|_| StorageError::unknown("navigation state lock poisoned"))
    }

    /// Records activity now.
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    /// Time since the last recorded activity, measured at `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        self.last_activity
            .lock()
            .map(|last| now.saturating_duration_since(*last))
            .unwrap_or_default()
    }

    pub fn upload(&self) -> Option<Arc<UploadSession>> {
        self.upload.read().ok().and_then(|u| u.clone())
    }

    /// The current upload, or `BadRequest` when none is in progress.
    pub fn require_upload(&self) -> Result<Arc<UploadSession>> {
        self.upload()
            .ok_or_else(|| StorageError::bad_request("no upload in progress"))
    }

    /// Installs a new upload. An unfinished previous upload into a different
    /// temporary directory is discarded.
    pub fn replace_upload(&self, upload: UploadSession) -> Result<Arc<UploadSession>> {
        let upload = Arc::new(upload);
        let previous = {
            let mut slot = self
                .upload
                .write()
                .map_err(|_| StorageError::unknown("upload slot lock poisoned"))?;
            slot.replace(Arc::clone(&upload))
        };
        if let Some(previous) = previous {
            if previous.temp_dir() != upload.temp_dir() {
                debug!(identity = %self.identity, "Replacing unfinished upload");
                previous.discard();
            }
        }
        Ok(upload)
    }

    /// Forgets `upload` if it is still the current one.
    pub fn finish_upload(&self, upload: &Arc<UploadSession>) {
        if let Ok(mut slot) = self.upload.write() {
            if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, upload)) {
                *slot = None;
            }
        }
    }

    pub fn download(&self) -> Option<Arc<DownloadSession>> {
        self.download.read().ok().and_then(|d| d.clone())
    }

    /// The current download, or `BadRequest` when none was started.
    pub fn require_download(&self) -> Result<Arc<DownloadSession>> {
        self.download()
            .ok_or_else(|| StorageError::bad_request("no download in progress"))
    }

    pub fn replace_download(&self, download: DownloadSession) -> Result<Arc<DownloadSession>> {
        let download = Arc::new(download);
        let mut slot = self
            .download
            .write()
            .map_err(|_| StorageError::unknown("download slot lock poisoned"))?;
        *slot = Some(Arc::clone(&download));
        Ok(download)
    }

    /// Drops transfer state, removing the chunks of an unfinished upload.
    pub fn close(&self) {
        if let Ok(mut slot) = self.upload.write() {
            if let Some(upload) = slot.take() {
                upload.discard();
            }
        }
        if let Ok(mut slot) = self.download.write() {
            slot.take();
        }
    }
}
