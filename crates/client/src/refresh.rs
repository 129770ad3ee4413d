//! Background credential refresh.
//!
//! A [`TokenRefresher`] owns one tokio task that sleeps until shortly before
//! the stored credential expires and then refreshes it. The task stops when
//! the refresher is stopped or dropped, or when the server rejects the
//! credential outright.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use protocol::ErrorKind;
use tracing::{debug, warn};

use crate::api::StorageClient;
use crate::error::ClientError;

/// Refresh this long before expiry.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Delay before retrying after a failed refresh.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Shortest wait between two refreshes.
pub const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// How long to wait before refreshing a credential expiring at `expires_at`.
///
/// The margin never exceeds half the remaining lifetime, so short-lived
/// credentials are refreshed halfway through instead of immediately.
pub fn refresh_delay(expires_at: u64, now: u64, margin: Duration) -> Duration {
    let remaining = Duration::from_secs(expires_at.saturating_sub(now));
    let margin = margin.min(remaining / 2);
    remaining.saturating_sub(margin).max(MIN_REFRESH_DELAY)
}

/// Whether another refresh attempt cannot succeed.
fn is_permanent(err: &ClientError) -> bool {
    matches!(err, ClientError::NotLoggedIn) || err.kind() == Some(ErrorKind::WrongCredentials)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Handle to the refresh task.
#[derive(Debug)]
pub struct TokenRefresher {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TokenRefresher {
    /// Spawns the refresh loop for `client`.
    pub fn start(client: StorageClient, margin: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                let Some(session) = client.session().await else {
                    debug!("No credential to refresh, refresher exiting");
                    break;
                };
                let delay = refresh_delay(session.expires_at, unix_now(), margin);

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                if let Err(e) = client.refresh().await {
                    if is_permanent(&e) {
                        warn!("Credential rejected, refresher exiting: {}", e);
                        break;
                    }
                    warn!("Credential refresh failed: {}", e);
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
            debug!("Token refresher stopped");
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stops the task and waits for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TokenRefresher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SessionToken;

    #[test]
    fn test_refresh_delay() {
        let margin = Duration::from_secs(30);
        assert_eq!(refresh_delay(1_300, 1_000, margin), Duration::from_secs(270));
        assert_eq!(refresh_delay(1_060, 1_000, margin), Duration::from_secs(30));
    }

    #[test]
    fn test_refresh_delay_short_lifetimes() {
        let margin = Duration::from_secs(30);
        assert_eq!(refresh_delay(1_010, 1_000, margin), Duration::from_secs(5));
        assert_eq!(refresh_delay(1_002, 1_000, margin), Duration::from_secs(1));
        assert_eq!(refresh_delay(1_001, 1_000, margin), MIN_REFRESH_DELAY);
        assert_eq!(refresh_delay(900, 1_000, margin), MIN_REFRESH_DELAY);
        assert_eq!(refresh_delay(1_000, 1_000, Duration::ZERO), MIN_REFRESH_DELAY);
    }

    #[test]
    fn test_permanent_failures() {
        assert!(is_permanent(&ClientError::NotLoggedIn));
        assert!(is_permanent(&protocol::StorageError::wrong_credentials().into()));
        assert!(!is_permanent(&protocol::StorageError::unknown("boom").into()));
    }

    #[tokio::test]
    async fn test_exits_without_credential() {
        let client = StorageClient::new("http://127.0.0.1:1").unwrap();
        let refresher = TokenRefresher::start(client, DEFAULT_REFRESH_MARGIN);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!refresher.is_running());
    }

    #[tokio::test]
    async fn test_stop_cancels_sleeping_task() {
        let client = StorageClient::new("http://127.0.0.1:1").unwrap();
        client
            .set_session(Some(SessionToken {
                token: "t".into(),
                expires_at: unix_now() + 3_600,
                root_dir: "alice/".into(),
            }))
            .await;

        let refresher = TokenRefresher::start(client, DEFAULT_REFRESH_MARGIN);
        assert!(refresher.is_running());
        tokio::time::timeout(Duration::from_secs(1), refresher.stop())
            .await
            .unwrap();
    }
}
