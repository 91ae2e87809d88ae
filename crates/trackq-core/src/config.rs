//! Configuration for trackq.
//!
//! Configuration can be loaded from:
//! - A TOML file (`TRACKQ_CONFIG`, else `~/.config/trackq/config.toml`)
//! - Environment variables (`TRACKQ_*`), which override file values
//!
//! `${VAR}` references inside the TOML file are substituted from the
//! environment before parsing, so secrets can stay out of the file.
//!
//! # Example
//!
//! ```rust,no_run
//! use trackq_core::config::TrackqConfig;
//!
//! let config = TrackqConfig::load().expect("Failed to load config");
//! println!("tracker at {}", config.tracker.base_url);
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::defaults;
use crate::models::SearchEndpoint;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

static ENV_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env reference pattern is valid")
});

/// Tracker REST API connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Base URL, e.g. `https://example.atlassian.net`.
    pub base_url: String,
    /// Account email for basic authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// API token for basic authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "TrackerConfig::default_timeout")]
    pub timeout_secs: u64,
    /// Search endpoint ladder, tried in order.
    #[serde(default = "TrackerConfig::default_endpoints")]
    pub endpoints: Vec<SearchEndpoint>,
}

impl TrackerConfig {
    fn default_timeout() -> u64 {
        defaults::REQUEST_TIMEOUT_SECS
    }

    fn default_endpoints() -> Vec<SearchEndpoint> {
        SearchEndpoint::LADDER.to_vec()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.base_url.is_empty() {
            return Err(ConfigError::Validation(
                "tracker base_url cannot be empty".to_string(),
            ));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "tracker base_url must start with http:// or https://, got: {}",
                self.base_url
            )));
        }
        if self.email.is_some() != self.api_token.is_some() {
            return Err(ConfigError::Validation(
                "tracker email and api_token must be set together".to_string(),
            ));
        }
        if self.endpoints.is_empty() {
            return Err(ConfigError::Validation(
                "tracker endpoint ladder cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            email: None,
            api_token: None,
            timeout_secs: Self::default_timeout(),
            endpoints: Self::default_endpoints(),
        }
    }
}

/// OpenAI-compatible text generation settings. Absent means no LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default = "LlmConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl LlmConfig {
    fn default_timeout() -> u64 {
        defaults::LLM_TIMEOUT_SECS
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "llm base_url must start with http:// or https://, got: {}",
                self.base_url
            )));
        }
        if self.model.is_empty() {
            return Err(ConfigError::Validation(
                "llm model cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::LLM_URL.to_string(),
            api_key: None,
            model: defaults::LLM_MODEL.to_string(),
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// Execution engine tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub page_size: u32,
    pub max_records: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub cache_size: usize,
    pub cache_ttl_secs: u64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            page_size: defaults::PAGE_SIZE,
            max_records: defaults::MAX_RECORDS,
            max_retries: defaults::MAX_RETRIES,
            retry_base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
            cache_size: defaults::RESULT_CACHE_SIZE,
            cache_ttl_secs: defaults::RESULT_CACHE_TTL_SECS,
        }
    }
}

impl ExecutionSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.page_size == 0 || self.page_size > defaults::PAGE_SIZE_MAX {
            return Err(ConfigError::Validation(format!(
                "execution page_size must be within 1..={}, got: {}",
                defaults::PAGE_SIZE_MAX,
                self.page_size
            )));
        }
        if self.max_records == 0 {
            return Err(ConfigError::Validation(
                "execution max_records must be positive".to_string(),
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::Validation(
                "retry_base_delay_ms cannot exceed retry_max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Directory cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    pub ttl_secs: u64,
    pub user_limit: usize,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            ttl_secs: defaults::DIRECTORY_TTL_SECS,
            user_limit: defaults::DIRECTORY_USER_LIMIT,
        }
    }
}

/// Name resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    /// Minimum similarity (0-100) for approximate matches.
    pub fuzzy_threshold: f64,
    /// Static aliases: nickname → canonical display name or project key.
    pub aliases: BTreeMap<String, String>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            fuzzy_threshold: defaults::FUZZY_NAME_THRESHOLD,
            aliases: BTreeMap::new(),
        }
    }
}

/// Summary heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    pub sample_size: usize,
    pub stale_days: i64,
    pub concentration_share: f64,
    pub concentration_min_records: usize,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            sample_size: defaults::SAMPLE_SIZE,
            stale_days: defaults::STALE_DAYS,
            concentration_share: defaults::CONCENTRATION_SHARE,
            concentration_min_records: defaults::CONCENTRATION_MIN_RECORDS,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackqConfig {
    /// JSON template corpus; the built-in corpus is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates_path: Option<PathBuf>,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub directory: DirectorySettings,
    #[serde(default)]
    pub resolver: ResolverSettings,
    #[serde(default)]
    pub aggregation: AggregationSettings,
}

impl TrackqConfig {
    /// Default config file path: `~/.config/trackq/config.toml`.
    pub fn default_config_path() -> PathBuf {
        let mut path = env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        path.push(".config");
        path.push("trackq");
        path.push("config.toml");
        path
    }

    /// Load from `TRACKQ_CONFIG` or the default path, then apply
    /// environment overrides. A missing file means environment only.
    pub fn load() -> ConfigResult<Self> {
        let path = env::var("TRACKQ_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_config_path());

        let mut config = if path.exists() {
            info!("Loading trackq config from: {}", path.display());
            Self::parse_file(&path)?
        } else {
            debug!(
                "Config file not found at {}, using environment variables",
                path.display()
            );
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file (no environment overrides).
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let config = Self::parse_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML text after `${VAR}` substitution.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let content = Self::substitute_env_vars(content);
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration from environment variables alone.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Overlay `TRACKQ_*` environment variables onto this configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("TRACKQ_BASE_URL") {
            self.tracker.base_url = v;
        }
        if let Ok(v) = env::var("TRACKQ_EMAIL") {
            self.tracker.email = Some(v);
        }
        if let Ok(v) = env::var("TRACKQ_API_TOKEN") {
            self.tracker.api_token = Some(v);
        }
        if let Some(v) = env_parse("TRACKQ_TIMEOUT") {
            self.tracker.timeout_secs = v;
        }
        if let Some(v) = env_parse("TRACKQ_MAX_RETRIES") {
            self.execution.max_retries = v;
        }
        if let Some(v) = env_parse("TRACKQ_PAGE_SIZE") {
            self.execution.page_size = v;
        }
        if let Some(v) = env_parse("TRACKQ_DIRECTORY_TTL") {
            self.directory.ttl_secs = v;
        }
        if let Ok(v) = env::var("TRACKQ_TEMPLATES") {
            self.templates_path = Some(PathBuf::from(v));
        }

        // Any LLM variable switches text generation on.
        let llm_url = env::var("TRACKQ_LLM_URL").ok();
        let llm_model = env::var("TRACKQ_LLM_MODEL").ok();
        let llm_key = env::var("TRACKQ_LLM_API_KEY").ok();
        if llm_url.is_some() || llm_model.is_some() || llm_key.is_some() {
            let llm = self.llm.get_or_insert_with(LlmConfig::default);
            if let Some(v) = llm_url {
                llm.base_url = v;
            }
            if let Some(v) = llm_model {
                llm.model = v;
            }
            if llm_key.is_some() {
                llm.api_key = llm_key;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.tracker.validate()?;
        self.execution.validate()?;
        if let Some(ref llm) = self.llm {
            llm.validate()?;
        }
        if !(0.0..=100.0).contains(&self.resolver.fuzzy_threshold) {
            return Err(ConfigError::Validation(format!(
                "resolver fuzzy_threshold must be within 0..=100, got: {}",
                self.resolver.fuzzy_threshold
            )));
        }
        if self.directory.ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "directory ttl_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Substitute environment variables in the format ${VAR_NAME}.
    fn substitute_env_vars(content: &str) -> String {
        ENV_REF
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .to_string()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}
