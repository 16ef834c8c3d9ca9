pub mod config_cmd;
pub mod extract;
pub mod replay;

use astrolabe_config::{AppConfig, ConfigError};
use std::path::Path;

/// Load `path` if given, otherwise the default config with env overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
}
