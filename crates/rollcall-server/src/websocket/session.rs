//! One observer connection, from upgrade to disconnect.
//!
//! The write half forwards snapshots and sends pings; the read half only
//! tracks liveness, since anything a client sends is a heartbeat. Whichever
//! side finishes first ends the session, and dropping the subscription
//! unregisters the observer.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use rollcall_engine::Subscription;
use rollcall_telemetry::metrics::OBSERVER_CONNECTIONS_TOTAL;

use super::heartbeat::{HeartbeatMonitor, HeartbeatResult, Liveness};
use crate::config::ServerConfig;

/// Why an observer session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent a close frame or hung up.
    ClientClosed,
    /// Reading from the socket failed.
    ReadFailed,
    /// Writing to the socket failed.
    WriteFailed,
    /// No inbound frame within the heartbeat timeout.
    TimedOut,
    /// The hub dropped this observer.
    Evicted,
    /// The server is shutting down.
    Shutdown,
}

impl SessionEnd {
    /// Label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::ReadFailed => "read_failed",
            Self::WriteFailed => "write_failed",
            Self::TimedOut => "timed_out",
            Self::Evicted => "evicted",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Drive an upgraded observer socket until it ends.
#[instrument(skip_all, fields(observer_id = %subscription.id(), committee_id = %subscription.topic().committee_id, kind = %subscription.topic().kind))]
pub async fn run_observer_session(
    socket: WebSocket,
    mut subscription: Subscription,
    config: Arc<ServerConfig>,
    cancel: CancellationToken,
) -> SessionEnd {
    counter!(OBSERVER_CONNECTIONS_TOTAL, "kind" => subscription.topic().kind.as_str()).increment(1);
    info!("observer connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let liveness = Liveness::new();

    let outbound = async {
        let mut ping = tokio::time::interval(config.heartbeat_interval());
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let _ = ping.tick().await;
        let mut monitor =
            HeartbeatMonitor::new(config.heartbeat_interval(), config.heartbeat_timeout());

        loop {
            tokio::select! {
                snapshot = subscription.recv() => match snapshot {
                    Some(json) => {
                        if ws_tx.send(Message::Text(json.as_str().into())).await.is_err() {
                            return SessionEnd::WriteFailed;
                        }
                    }
                    None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return SessionEnd::Evicted;
                    }
                },
                _ = ping.tick() => {
                    if monitor.tick(&liveness) == HeartbeatResult::TimedOut {
                        return SessionEnd::TimedOut;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        return SessionEnd::WriteFailed;
                    }
                }
                () = cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    };

    let inbound = async {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Close(_)) => return SessionEnd::ClientClosed,
                Ok(_) => liveness.mark_alive(),
                Err(e) => {
                    debug!(error = %e, "observer read failed");
                    return SessionEnd::ReadFailed;
                }
            }
        }
        SessionEnd::ClientClosed
    };

    let end = tokio::select! {
        end = outbound => end,
        end = inbound => end,
    };
    info!(reason = end.as_str(), "observer disconnected");
    end
}
