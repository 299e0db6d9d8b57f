//! Logging and metric naming for rollcall.
//!
//! [`init_telemetry`] installs the global `tracing` subscriber: a pretty or
//! JSON stdout layer gated by `RUST_LOG` (falling back to the configured
//! level), plus an optional [`IncidentLog`] layer that keeps every warn+
//! event for administrators to read back.

mod incidents;
pub mod metrics;

pub use incidents::{
    DEFAULT_RETENTION, Incident, IncidentFilter, IncidentLayer, IncidentLog, MAX_READ, NewIncident,
};

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Telemetry failures.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The incident database could not be opened or queried.
    #[error("incident database: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The incident database directory could not be created.
    #[error("incident directory: {0}")]
    Io(#[from] std::io::Error),
    /// The level directive did not parse.
    #[error("invalid log filter '{filter}': {detail}")]
    Filter {
        /// The rejected directive.
        filter: String,
        /// Parser message.
        detail: String,
    },
    /// A global subscriber was already installed.
    #[error("tracing subscriber already initialised: {0}")]
    AlreadyInitialised(String),
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or
    /// `info,rollcall_engine=debug`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Incident database; `None` keeps warnings on stdout only.
    pub incident_db: Option<PathBuf>,
    /// Rows kept in the incident database.
    pub incident_retention: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            incident_db: None,
            incident_retention: DEFAULT_RETENTION,
        }
    }
}

/// Returned by [`init_telemetry`]; holds the incident log when enabled.
pub struct TelemetryGuard {
    incidents: Option<Arc<IncidentLog>>,
}

impl TelemetryGuard {
    /// The incident log, when configured and opened.
    pub fn incidents(&self) -> Option<Arc<IncidentLog>> {
        self.incidents.clone()
    }
}

/// Install the global subscriber. Call once at startup.
///
/// A log database that fails to open disables the SQLite layer with a
/// warning instead of aborting startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| TelemetryError::Filter {
            filter: config.level.clone(),
            detail: e.to_string(),
        })?,
    };

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    let (incident_layer, incidents, open_error) = match &config.incident_db {
        Some(path) => match IncidentLog::open(path, config.incident_retention) {
            Ok(log) => {
                let log = Arc::new(log);
                (Some(IncidentLayer::new(Arc::clone(&log))), Some(log), None)
            }
            Err(e) => (None, None, Some((path, e))),
        },
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .with(incident_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialised(e.to_string()))?;

    if let Some((path, e)) = open_error {
        tracing::warn!(path = %path.display(), error = %e, "incident log unavailable, warnings go to stdout only");
    }

    Ok(TelemetryGuard { incidents })
}
