//! # rollcall-settings
//!
//! Layered configuration: compiled defaults, then a JSON file, then
//! `ROLLCALL_*` environment variables. See [`loader`] for the merge order.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{ENV_PREFIX, load_settings, load_settings_from_path, settings_path};
pub use types::{
    AuthSettings, DatabaseSettings, LoggingSettings, RollcallSettings, RosterSettings,
    ServerSettings, rollcall_home,
};
