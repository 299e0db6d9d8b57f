//! Server configuration.

use std::time::Duration;

use rollcall_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the rollcall server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Seconds between observer pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds without any inbound frame before an observer is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Snapshots buffered per observer.
    pub observer_queue_size: usize,
    /// Max inbound WebSocket message size in bytes. Observers only send
    /// heartbeats, so this stays small.
    pub max_message_size: usize,
    /// How long shutdown waits for in-flight work.
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Ping cadence.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Silence allowed before disconnecting.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            observer_queue_size: 32,
            max_message_size: 64 * 1024,
            shutdown_timeout_secs: 10,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            heartbeat_interval_secs: s.heartbeat_interval_secs,
            heartbeat_timeout_secs: s.heartbeat_timeout_secs,
            observer_queue_size: s.observer_queue_size,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn from_settings() {
        let settings = ServerSettings {
            host: "0.0.0.0".into(),
            port: 9100,
            heartbeat_interval_secs: 5,
            heartbeat_timeout_secs: 15,
            observer_queue_size: 4,
        };
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.heartbeat_timeout_secs, 15);
        assert_eq!(cfg.observer_queue_size, 4);
        assert_eq!(cfg.max_message_size, ServerConfig::default().max_message_size);
    }
}
