//! Shutdown signal shared by the listener and every open session.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns the server's cancellation token.
///
/// Sessions select on the token and end with [`SessionEnd::Shutdown`];
/// their RAII guards then unregister devices and UIs.
///
/// [`SessionEnd::Shutdown`]: crate::websocket::SessionEnd::Shutdown
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator with a fresh token.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle on the shared token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the token. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Cancel, then give `server` up to `timeout` to drain.
    ///
    /// Returns `false` and aborts the task if it is still running after the
    /// timeout.
    pub async fn graceful_shutdown(&self, mut server: JoinHandle<()>, timeout: Duration) -> bool {
        self.shutdown();
        info!(timeout_secs = timeout.as_secs(), "draining connections");

        if tokio::time::timeout(timeout, &mut server).await.is_ok() {
            return true;
        }
        warn!(?timeout, "server did not drain in time, aborting");
        server.abort();
        false
    }
}
