//! Settings type definitions.
//!
//! Every section is `#[serde(default)]`, so a settings file only needs the
//! keys it changes. Field names are snake_case in JSON so the same key
//! works as an env override (`ROLLCALL_SERVER__PORT`).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the rollcall server.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollcallSettings {
    /// Network and observer channel settings.
    pub server: ServerSettings,
    /// Persistent store location.
    pub database: DatabaseSettings,
    /// Administrator token settings.
    pub auth: AuthSettings,
    /// Committee directory checks.
    pub roster: RosterSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RollcallSettings {
    /// Reject values that parse but cannot run.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if server.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeat_interval_secs must be positive".into(),
            ));
        }
        if server.heartbeat_timeout_secs < server.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeat_timeout_secs ({}) is shorter than the interval ({})",
                server.heartbeat_timeout_secs, server.heartbeat_interval_secs
            )));
        }
        if server.observer_queue_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.observer_queue_size must be positive".into(),
            ));
        }
        if self.logging.incident_retention == 0 {
            return Err(SettingsError::InvalidValue(
                "logging.incident_retention must be positive".into(),
            ));
        }
        if self.auth.token_ttl_hours == 0 {
            return Err(SettingsError::InvalidValue(
                "auth.token_ttl_hours must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Server network settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port; 0 picks an ephemeral port.
    pub port: u16,
    /// Seconds between observer pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a pong before an observer is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Snapshots buffered per observer before drops start.
    pub observer_queue_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            observer_queue_size: 32,
        }
    }
}

/// SQLite location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Database file; parent directories are created on open.
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: rollcall_home().join("rollcall.db"),
        }
    }
}

/// Administrator bearer token settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HS256 signing secret. Empty disables administrator access.
    pub jwt_secret: String,
    /// Expected `iss` claim.
    pub issuer: String,
    /// Lifetime of issued tokens.
    pub token_ttl_hours: u64,
}

impl AuthSettings {
    /// The signing secret, or an error when none is configured.
    pub fn secret(&self) -> Result<&str> {
        if self.jwt_secret.is_empty() {
            return Err(SettingsError::InvalidValue(
                "auth.jwt_secret is not set (ROLLCALL_AUTH__JWT_SECRET)".into(),
            ));
        }
        Ok(&self.jwt_secret)
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            issuer: "rollcall".into(),
            token_ttl_hours: 24,
        }
    }
}

/// Committee directory enforcement.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterSettings {
    /// Reject unknown committees and non-participant delegations.
    pub enforce: bool,
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// JSON lines instead of human-readable output.
    pub json: bool,
    /// Keep warn+ events in the incident database.
    pub incident_log: bool,
    /// Incident database file.
    pub incident_path: PathBuf,
    /// Rows kept in the incident database.
    pub incident_retention: u64,
}

impl LoggingSettings {
    /// Incident database path, when the incident log is on.
    pub fn incident_db(&self) -> Option<PathBuf> {
        self.incident_log.then(|| self.incident_path.clone())
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            incident_log: false,
            incident_path: rollcall_home().join("incidents.db"),
            incident_retention: 10_000,
        }
    }
}

/// `$HOME/.rollcall`, or `/tmp/.rollcall` without a home directory.
pub fn rollcall_home() -> PathBuf {
    std::env::var("HOME")
        .map_or_else(|_| PathBuf::from("/tmp"), PathBuf::from)
        .join(".rollcall")
}
