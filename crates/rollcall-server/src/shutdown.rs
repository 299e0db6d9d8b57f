//! Server shutdown.
//!
//! Observer sockets run on their own tasks, spawned by the WebSocket
//! upgrade, so stopping the listener does not wait for them. Shutdown
//! cancels the shared token, joins the listener task, then polls the hub
//! until every observer has unregistered or the deadline passes.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rollcall_engine::BroadcastHub;

const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Outcome of [`ShutdownCoordinator::drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The listener task finished before the deadline.
    pub server_stopped: bool,
    /// Observers still registered when the deadline passed.
    pub observers_remaining: usize,
}

impl ShutdownReport {
    /// Listener stopped and every observer unregistered.
    pub fn is_clean(&self) -> bool {
        self.server_stopped && self.observers_remaining == 0
    }
}

/// Owns the cancellation token that the listener and every observer
/// session watch.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    hub: Arc<BroadcastHub>,
}

impl ShutdownCoordinator {
    /// Coordinator draining observers of `hub`.
    pub fn new(hub: Arc<BroadcastHub>) -> Self {
        Self {
            token: CancellationToken::new(),
            hub,
        }
    }

    /// Token handed to the listener and to each observer session.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal shutdown without waiting.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel, then wait up to `timeout` for the listener task and for the
    /// hub to empty. A listener still running at the deadline is aborted.
    pub async fn drain(&self, mut server: JoinHandle<()>, timeout: Duration) -> ShutdownReport {
        let deadline = Instant::now() + timeout;
        let observers = self.hub.total_observers();
        info!(observers, timeout_ms = timeout.as_millis() as u64, "draining");
        self.cancel();

        let server_stopped = match tokio::time::timeout_at(deadline, &mut server).await {
            Ok(joined) => joined.is_ok(),
            Err(_) => {
                server.abort();
                false
            }
        };

        while self.hub.total_observers() > 0 && Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL).await;
        }

        let report = ShutdownReport {
            server_stopped,
            observers_remaining: self.hub.total_observers(),
        };
        if report.is_clean() {
            info!("drained");
        } else {
            warn!(
                server_stopped = report.server_stopped,
                observers_remaining = report.observers_remaining,
                "shutdown deadline passed"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{CommitteeId, SessionKind};
    use rollcall_engine::{Observer, Topic};

    const TOPIC: Topic = Topic::new(CommitteeId::new(7), SessionKind::Attendance);

    fn idle_server(token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { token.cancelled().await })
    }

    #[tokio::test]
    async fn empty_hub_drains_cleanly() {
        let coord = ShutdownCoordinator::new(Arc::new(BroadcastHub::new()));
        let server = idle_server(coord.token());
        let report = coord.drain(server, Duration::from_secs(1)).await;
        assert!(coord.is_shutting_down());
        assert!(report.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_observers_to_unregister() {
        let hub = Arc::new(BroadcastHub::new());
        let coord = ShutdownCoordinator::new(Arc::clone(&hub));
        let (observer, _rx) = Observer::channel(4);
        let id = observer.id.clone();
        assert!(hub.register(TOPIC, observer));

        // An observer session that needs a moment to close its socket.
        let token = coord.token();
        let session_hub = Arc::clone(&hub);
        let _session = tokio::spawn(async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = session_hub.unregister(TOPIC, &id);
        });

        let server = idle_server(coord.token());
        let report = coord.drain(server, Duration::from_secs(5)).await;
        assert_eq!(
            report,
            ShutdownReport {
                server_stopped: true,
                observers_remaining: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_observer_is_reported() {
        let hub = Arc::new(BroadcastHub::new());
        let coord = ShutdownCoordinator::new(Arc::clone(&hub));
        let (observer, _rx) = Observer::channel(4);
        assert!(hub.register(TOPIC, observer));

        let server = idle_server(coord.token());
        let report = coord.drain(server, Duration::from_millis(100)).await;
        assert!(report.server_stopped);
        assert_eq!(report.observers_remaining, 1);
        assert!(!report.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_listener_is_aborted() {
        let coord = ShutdownCoordinator::new(Arc::new(BroadcastHub::new()));
        let server = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        let report = coord.drain(server, Duration::from_millis(100)).await;
        assert!(!report.server_stopped);
        assert_eq!(report.observers_remaining, 0);
    }
}
