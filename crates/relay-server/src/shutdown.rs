//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Default timeout for graceful shutdown before force-exiting.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates graceful shutdown across the accept loop and all
/// subscriber session tasks.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a subscriber session as a tracked task.
    pub fn spawn_session<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.sessions.spawn(fut)
    }

    /// Number of tracked session tasks that have not yet finished.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Perform a graceful shutdown.
    ///
    /// 1. Cancel the shutdown token (signals the accept loop and all
    ///    session tasks)
    /// 2. Wait up to `timeout` for tracked sessions to drain
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        self.sessions.close();
        info!(
            session_count = self.sessions.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for sessions to drain"
        );

        if tokio::time::timeout(timeout, self.sessions.wait())
            .await
            .is_err()
        {
            warn!("shutdown timed out after {timeout:?}, some sessions may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
