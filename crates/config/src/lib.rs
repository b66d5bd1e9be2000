//! Configuration loading and validation for parley.
//!
//! Loads configuration from `~/.parley/config.toml` with environment
//! variable overrides. Validates all settings at startup.

pub mod pipeline;

use parley_core::AgentDefinition;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

pub use pipeline::{PipelineFileWatcher, StaticPipeline, WatchedPipeline};

/// The root configuration structure.
///
/// Maps directly to `~/.parley/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParleyConfig {
    /// Agents known at startup. More can be added at runtime.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentDefinition>,

    /// Middleware ordering
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Conversation memory
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Prompt caching
    #[serde(default)]
    pub cache: CacheConfig,

    /// Usage tracking
    #[serde(default)]
    pub usage: UsageConfig,

    /// Retry policy
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Ordered middleware names, outermost first.
///
/// Empty means every registered middleware in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub middleware: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    File,
    Sqlite,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::File => write!(f, "file"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Which conversation store backs agents without native history
    #[serde(default)]
    pub store: StoreKind,

    /// Directory (file store) or database URL (sqlite store)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Upper bound on messages sent per call; unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_messages: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Texts with fewer words than this never use the provider cache
    #[serde(default = "default_min_words")]
    pub min_words: usize,

    /// TTL applied when callers do not pick one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

fn default_min_words() -> usize {
    2048
}

fn default_ttl_secs() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_words: default_min_words(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageConfig {
    /// Tags attached to every usage record
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_tags: BTreeMap<String, String>,

    /// Record usage reported at the end of streams
    #[serde(default)]
    pub track_streaming: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Per-attempt timeout; no timeout when absent
    #[serde(default = "default_attempt_timeout_secs", skip_serializing_if = "Option::is_none")]
    pub attempt_timeout_secs: Option<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_attempt_timeout_secs() -> Option<u64> {
    Some(120)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

impl ParleyConfig {
    /// Load configuration from the default path (~/.parley/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `PARLEY_PIPELINE`: comma-separated middleware names
    /// - `PARLEY_MAX_MESSAGES`: conversation window size
    /// - `PARLEY_CACHE_MIN_WORDS`: provider cache threshold
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
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

        let config = Self::parse(&content).map_err(|reason| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason,
        })?;

        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Apply `PARLEY_*` overrides read through `lookup`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(list) = lookup("PARLEY_PIPELINE") {
            self.pipeline.middleware = parse_name_list(&list);
        }

        if let Some(raw) = lookup("PARLEY_MAX_MESSAGES") {
            let max = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "PARLEY_MAX_MESSAGES",
                value: raw.clone(),
            })?;
            self.conversation.max_messages = Some(max);
        }

        if let Some(raw) = lookup("PARLEY_CACHE_MIN_WORDS") {
            self.cache.min_words = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "PARLEY_CACHE_MIN_WORDS",
                value: raw.clone(),
            })?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".parley")
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(ConfigError::ValidationError("agent name must not be empty".into()));
            }
            if agent.kind.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "agent '{}' has no kind",
                    agent.name
                )));
            }
            if !seen.insert(agent.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "agent '{}' is defined more than once",
                    agent.name
                )));
            }
        }

        if self.cache.default_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "cache.default_ttl_secs must be > 0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.multiplier must be >= 1.0".into(),
            ));
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_name_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
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

    #[error("Invalid value for {var}: '{value}'")]
    InvalidEnv { var: &'static str, value: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
[[agents]]
name = "support"
kind = "openai"
model = "gpt-4o"

[[agents]]
name = "researcher"
kind = "gemini"
instructions = "Cite sources."

[agents.settings]
endpoint = "https://example.invalid"

[pipeline]
middleware = ["usage", "conversation", "caching"]

[conversation]
store = "file"
path = "/var/lib/parley"
max_messages = 20

[usage]
track_streaming = true

[usage.default_tags]
team = "cx"
"#;

    #[test]
    fn default_config_is_valid() {
        let config = ParleyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.min_words, 2048);
        assert_eq!(config.conversation.store, StoreKind::Memory);
        assert!(config.pipeline.middleware.is_empty());
    }

    #[test]
    fn parses_full_sample() {
        let config = ParleyConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[0].model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.agents[1].settings["endpoint"], "https://example.invalid");
        assert_eq!(
            config.pipeline.middleware,
            vec!["usage", "conversation", "caching"]
        );
        assert_eq!(config.conversation.store, StoreKind::File);
        assert_eq!(config.conversation.max_messages, Some(20));
        assert!(config.usage.track_streaming);
        assert_eq!(config.usage.default_tags["team"], "cx");
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = ParleyConfig::parse(SAMPLE).unwrap();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = ParleyConfig::parse(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn duplicate_agent_rejected() {
        let config = ParleyConfig {
            agents: vec![
                AgentDefinition::new("a", "openai"),
                AgentDefinition::new("a", "gemini"),
            ],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn invalid_retry_rejected() {
        let mut config = ParleyConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ParleyConfig::default();
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PARLEY_PIPELINE", " retry, ,usage "),
            ("PARLEY_MAX_MESSAGES", "12"),
            ("PARLEY_CACHE_MIN_WORDS", "100"),
        ]);
        let mut config = ParleyConfig::default();
        config
            .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.pipeline.middleware, vec!["retry", "usage"]);
        assert_eq!(config.conversation.max_messages, Some(12));
        assert_eq!(config.cache.min_words, 100);
    }

    #[test]
    fn bad_env_value_is_an_error() {
        let mut config = ParleyConfig::default();
        let err = config
            .apply_env_overrides(|key| (key == "PARLEY_MAX_MESSAGES").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: "PARLEY_MAX_MESSAGES", .. }));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = ParleyConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config, ParleyConfig::default());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[pipeline\nmiddleware = 3").unwrap();
        assert!(matches!(
            ParleyConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = ParleyConfig::default_toml();
        assert!(toml_str.contains("min_words = 2048"));
        assert!(toml_str.contains("max_attempts = 3"));
    }
}
