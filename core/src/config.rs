//! Runtime configuration.
//!
//! Values come from defaults, optionally overlaid by a TOML document and then by
//! `RIVULET_*` environment variables.

use std::{env, fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable enabling bus debug logging.
pub const ENV_DEBUG_BUS: &str = "RIVULET_DEBUG_BUS";
/// Environment variable overriding [`Config::max_emit_depth`].
pub const ENV_MAX_EMIT_DEPTH: &str = "RIVULET_MAX_EMIT_DEPTH";
/// Environment variable overriding [`Config::max_update_passes`].
pub const ENV_MAX_UPDATE_PASSES: &str = "RIVULET_MAX_UPDATE_PASSES";
/// Environment variable overriding [`Config::log_filter`].
pub const ENV_LOG_FILTER: &str = "RIVULET_LOG";

const DEFAULT_MAX_EMIT_DEPTH: usize = 16;
const DEFAULT_MAX_UPDATE_PASSES: usize = 8;

/// Tunables shared by every component created from one [`Environment`](crate::Environment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Log every bus registration, removal and emission with its payload.
    pub debug_bus: bool,
    /// Deepest nesting of `emit` calls for one event name before emissions are dropped.
    pub max_emit_depth: usize,
    /// Update passes one `set_state` may trigger through reentrant `set_state` calls.
    pub max_update_passes: usize,
    /// `tracing` filter directive used by the logging setup when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug_bus: false,
            max_emit_depth: DEFAULT_MAX_EMIT_DEPTH,
            max_update_passes: DEFAULT_MAX_UPDATE_PASSES,
            log_filter: None,
        }
    }
}

impl Config {
    /// Parses a TOML document; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed documents or unknown keys.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or [`ConfigError::Parse`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Defaults overlaid with `RIVULET_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparsable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env()
    }

    /// Overlays `RIVULET_*` environment variables onto this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparsable values.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_vars(|name| env::var(name).ok())
    }

    fn with_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(ENV_DEBUG_BUS) {
            self.debug_bus = parse_flag(ENV_DEBUG_BUS, value)?;
        }
        if let Some(value) = lookup(ENV_MAX_EMIT_DEPTH) {
            self.max_emit_depth = parse_var(ENV_MAX_EMIT_DEPTH, value)?;
        }
        if let Some(value) = lookup(ENV_MAX_UPDATE_PASSES) {
            self.max_update_passes = parse_var(ENV_MAX_UPDATE_PASSES, value)?;
        }
        if let Some(value) = lookup(ENV_LOG_FILTER) {
            self.log_filter = Some(value);
        }
        Ok(self)
    }
}

fn parse_flag(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnv { var, value }),
    }
}

fn parse_var<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}
