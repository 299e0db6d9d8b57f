//! Layered settings loading.
//!
//! Sources, lowest priority first:
//! 1. Compiled [`RollcallSettings::default()`]
//! 2. A JSON settings file, `~/.rollcall/settings.json` unless overridden
//! 3. `ROLLCALL_*` environment variables, `__` separating sections
//!    (`ROLLCALL_SERVER__PORT=9000`)
//!
//! Objects merge per key; scalars from a higher layer replace lower ones.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{RollcallSettings, rollcall_home};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "ROLLCALL_";

/// Resolve the default settings file (`~/.rollcall/settings.json`).
pub fn settings_path() -> PathBuf {
    rollcall_home().join("settings.json")
}

/// Load from the default path. A missing file means defaults plus env.
pub fn load_settings() -> Result<RollcallSettings> {
    let path = settings_path();
    if !path.exists() {
        debug!(?path, "settings file not found, using defaults");
    }
    extract(figment(&path))
}

/// Load from an explicit path, which must exist.
pub fn load_settings_from_path(path: &Path) -> Result<RollcallSettings> {
    if !path.exists() {
        return Err(SettingsError::MissingFile(path.display().to_string()));
    }
    debug!(?path, "loading settings from file");
    extract(figment(path))
}

/// The merged provider stack, exposed for callers that add their own layer.
pub fn figment(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(RollcallSettings::default()))
        .merge(Json::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

fn extract(figment: Figment) -> Result<RollcallSettings> {
    let settings: RollcallSettings = figment.extract()?;
    settings.validate()?;
    Ok(settings)
}
