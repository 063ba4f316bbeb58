//! Configuration management for chatter.
//!
//! The assistant reads a single JSON configuration file at `~/.chatter/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (CHATTER_* prefix, plus `OPENAI_API_KEY`)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `CHATTER_LOG_LEVEL` → observability.log_level
//! - `CHATTER_LOG_FORMAT` → observability.log_format
//! - `CHATTER_BACKEND_URL` → backend.base_url
//! - `CHATTER_MODEL` → backend.model
//! - `CHATTER_PROXY` → backend.proxy
//! - `OPENAI_API_KEY` → backend.api_key
//! - `CHATTER_DATA_DIR` → storage.data_dir

use crate::error::{Error, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".chatter"),
        |dirs| dirs.home_dir().join(".chatter"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Persona used when a session is created without an explicit prompt.
pub const DEFAULT_PERSONA: &str = "Keep the tone light rather than formal: be playful and cute, \
and feel free to sprinkle in cute interjections so everyone in the group finds you fun to talk to.\n\
The members also love someone who talks like a cat girl, for example by often saying \"nya\" or \"mew\", \
so try speaking in that style.";

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Language-model backend configuration
    #[serde(default)]
    pub backend: BackendConfig,

    /// Context window assembly
    #[serde(default)]
    pub context: ContextConfig,

    /// Engagement gate probabilities
    #[serde(default)]
    pub engagement: EngagementConfig,

    /// Reply debouncing
    #[serde(default)]
    pub debounce: DebounceConfig,

    /// Session state persistence
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .context(format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration (default path or `path`) and apply environment overrides.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("CHATTER_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("CHATTER_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Ok(url) = std::env::var("CHATTER_BACKEND_URL") {
            self.backend.base_url = url;
        }
        if let Ok(model) = std::env::var("CHATTER_MODEL") {
            self.backend.model = model;
        }
        if let Ok(proxy) = std::env::var("CHATTER_PROXY") {
            self.backend.proxy = Some(proxy);
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.backend.api_key = key;
        }
        if let Ok(dir) = std::env::var("CHATTER_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Check the configuration for values the assistant cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.backend.api_key.trim().is_empty() {
            return Err(Error::Config("backend.api_key is not set".into()));
        }
        if self.backend.base_url.trim().is_empty() {
            return Err(Error::Config("backend.base_url is empty".into()));
        }
        if let Some(proxy) = &self.backend.proxy {
            url::Url::parse(proxy)
                .map_err(|e| Error::Config(format!("backend.proxy is not a valid URL: {e}")))?;
        }
        if self.context.char_budget == 0 {
            return Err(Error::Config("context.char_budget must be positive".into()));
        }
        if self.engagement.warm_probability > 100 || self.engagement.cold_probability > 100 {
            return Err(Error::Config(
                "engagement probabilities must be within 0..=100".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to quiet down to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

/// OpenAI-compatible backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// API base URL, without the `/v1/...` suffix
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token
    #[serde(default)]
    pub api_key: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Optional HTTP(S) proxy URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Sampling temperature, backend default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

fn default_base_url() -> String {
    "https://api.openai.com".into()
}

fn default_model() -> String {
    "gpt-3.5-turbo".into()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            model: default_model(),
            proxy: None,
            timeout_secs: default_timeout_secs(),
            temperature: None,
        }
    }
}

/// Context window assembly configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Character budget for the history handed to the backend
    #[serde(default = "default_char_budget")]
    pub char_budget: usize,

    /// Persona used for sessions created without a prompt
    #[serde(default = "default_persona")]
    pub default_persona: String,
}

fn default_char_budget() -> usize {
    2000
}

fn default_persona() -> String {
    DEFAULT_PERSONA.to_string()
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            char_budget: default_char_budget(),
            default_persona: default_persona(),
        }
    }
}

/// Engagement gate configuration (percentages out of 100).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementConfig {
    /// Chance to reply once the session has warmed up
    #[serde(default = "default_warm_probability")]
    pub warm_probability: u32,

    /// Chance to reply while the session is still fresh
    #[serde(default = "default_cold_probability")]
    pub cold_probability: u32,

    /// History length at which a session counts as warm
    #[serde(default = "default_warm_history_threshold")]
    pub warm_history_threshold: usize,
}

fn default_warm_probability() -> u32 {
    60
}

fn default_cold_probability() -> u32 {
    10
}

fn default_warm_history_threshold() -> usize {
    5
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            warm_probability: default_warm_probability(),
            cold_probability: default_cold_probability(),
            warm_history_threshold: default_warm_history_threshold(),
        }
    }
}

/// Reply debouncing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// Quiet interval before a reply fires, in milliseconds
    #[serde(default = "default_quiet_interval_ms")]
    pub quiet_interval_ms: u64,
}

fn default_quiet_interval_ms() -> u64 {
    4000
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            quiet_interval_ms: default_quiet_interval_ms(),
        }
    }
}

impl DebounceConfig {
    /// Quiet interval as a `Duration`.
    pub fn quiet_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.quiet_interval_ms)
    }
}

/// Session state persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Directory for persisted state, `~/.chatter/data` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Effective data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| config_dir().join("data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.backend.api_key = "sk-test".into();
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.context.char_budget, 2000);
        assert_eq!(config.engagement.warm_probability, 60);
        assert_eq!(config.engagement.cold_probability, 10);
        assert_eq!(config.engagement.warm_history_threshold, 5);
        assert_eq!(config.debounce.quiet_interval_ms, 4000);
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.context.default_persona, DEFAULT_PERSONA);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.backend.model, "gpt-3.5-turbo");
        assert_eq!(config.debounce.quiet_interval().as_secs(), 4);
    }

    #[test]
    fn test_partial_section() {
        let json = r#"{"context": {"char_budget": 500}, "observability": {"level": "debug"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.context.char_budget, 500);
        assert_eq!(config.context.default_persona, DEFAULT_PERSONA);
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"backend": {"api_key": "sk-file", "model": "gpt-4o"}}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.backend.api_key, "sk-file");
        assert_eq!(config.backend.model, "gpt-4o");
    }

    #[test]
    fn test_load_from_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_validate_requires_api_key() {
        let err = Config::default().validate().unwrap_err();
        assert!(err.is_config());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = valid_config();
        config.context.char_budget = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.engagement.warm_probability = 101;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.backend.proxy = Some("not a url".into());
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.backend.proxy = Some("http://127.0.0.1:7890".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_storage_data_dir_override() {
        let storage = StorageConfig {
            data_dir: Some(PathBuf::from("/tmp/chatter")),
        };
        assert_eq!(storage.data_dir(), PathBuf::from("/tmp/chatter"));
    }
}
