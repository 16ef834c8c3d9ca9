//! Configuration loading, validation, and management for Astrolabe.
//!
//! Loads configuration from `~/.astrolabe/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.astrolabe/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model identifier passed to the model client
    #[serde(default = "default_model")]
    pub model: String,

    /// Temperature override (client default when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Max tokens override per model turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Language selector handed to the prompt builder
    #[serde(default = "default_language")]
    pub language: String,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_language() -> String {
    "en".into()
}

/// Conversation loop limits and heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Ceiling on turns that invoke tools
    #[serde(default = "default_max_tool_turns")]
    pub max_tool_turns: u32,

    /// Ceiling on all turns, tool-invoking or not
    #[serde(default = "default_max_total_turns")]
    pub max_total_turns: u32,

    /// Per-tool execution timeout in seconds; 0 disables it
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Capacity of the outward event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Streaming duplicate-suppression thresholds
    #[serde(default)]
    pub duplicates: DuplicateConfig,
}

fn default_max_tool_turns() -> u32 {
    10
}
fn default_max_total_turns() -> u32 {
    15
}
fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_event_buffer() -> usize {
    128
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_turns: default_max_tool_turns(),
            max_total_turns: default_max_total_turns(),
            tool_timeout_secs: default_tool_timeout_secs(),
            event_buffer: default_event_buffer(),
            duplicates: DuplicateConfig::default(),
        }
    }
}

/// Thresholds for suppressing re-sent stream fragments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateConfig {
    /// A delta whose first N characters already appear in emitted text is dropped
    #[serde(default = "default_prefix_chars")]
    pub prefix_chars: usize,

    /// Deltas shorter than this are always emitted
    #[serde(default = "default_min_fragment_chars")]
    pub min_fragment_chars: usize,
}

fn default_prefix_chars() -> usize {
    50
}
fn default_min_fragment_chars() -> usize {
    8
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            prefix_chars: default_prefix_chars(),
            min_fragment_chars: default_min_fragment_chars(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.astrolabe/config.toml).
    ///
    /// Environment overrides:
    /// - `ASTROLABE_MODEL`
    /// - `ASTROLABE_LANGUAGE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(model) = std::env::var("ASTROLABE_MODEL") {
            config.model = model;
        }
        if let Ok(language) = std::env::var("ASTROLABE_LANGUAGE") {
            config.language = language;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".astrolabe")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_tool_turns == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_turns must be at least 1".into(),
            ));
        }

        if self.agent.max_total_turns < self.agent.max_tool_turns {
            return Err(ConfigError::ValidationError(
                "agent.max_total_turns must be >= agent.max_tool_turns".into(),
            ));
        }

        if self.agent.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "agent.event_buffer must be at least 1".into(),
            ));
        }

        if self.agent.duplicates.prefix_chars == 0 {
            return Err(ConfigError::ValidationError(
                "agent.duplicates.prefix_chars must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Render the configuration as TOML (for `astrolabe config`).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: None,
            max_tokens: None,
            language: default_language(),
            agent: AgentConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
