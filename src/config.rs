//! Configuration for the session engine
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `SESSION_ENGINE__<SECTION>__<KEY>` environment variables.

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub summarization: SummarizationConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // A missing .env file is normal outside development.
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("SESSION_ENGINE")
                .separator("__")
                .try_parsing(true),
        );

        let mut loaded: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SessionError::Configuration(e.to_string()))?;

        if loaded.llm.api_key.is_none() {
            loaded.llm.api_key = std::env::var("OPENAI_API_KEY").ok();
        }

        loaded.validate()?;
        Ok(loaded)
    }

    /// Parse configuration from a TOML string (defaults fill the gaps)
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let loaded: Config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SessionError::Configuration(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if !(self.tokens.threshold > 0.0 && self.tokens.threshold <= 1.0) {
            return Err(SessionError::Configuration(format!(
                "tokens.threshold must be in (0.0, 1.0], got {}",
                self.tokens.threshold
            )));
        }
        if self.tokens.max_tokens == 0 {
            return Err(SessionError::Configuration(
                "tokens.max_tokens must be positive".to_string(),
            ));
        }
        if self.persistence.max_attempts == 0 {
            return Err(SessionError::Configuration(
                "persistence.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Token accounting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Model name passed to the tokenizer
    #[serde(default = "default_model")]
    pub model: String,

    /// Context window of the model
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Fraction of `max_tokens` that triggers summarization
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Per-message framing overhead in tokens
    #[serde(default = "default_message_overhead")]
    pub message_overhead: usize,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> usize {
    128_000
}

fn default_threshold() -> f64 {
    0.8
}

fn default_message_overhead() -> usize {
    3
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            threshold: default_threshold(),
            message_overhead: default_message_overhead(),
        }
    }
}

/// Summarization workflow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizationConfig {
    /// Exchanges preserved verbatim after a summary
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,

    /// Minimum Layer-1 items before summarization is attempted
    #[serde(default = "default_min_messages")]
    pub min_messages: usize,
}

fn default_keep_recent() -> usize {
    2
}

fn default_min_messages() -> usize {
    4
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            keep_recent: default_keep_recent(),
            min_messages: default_min_messages(),
        }
    }
}

/// Layer-2 retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl PersistenceConfig {
    /// Delay before the given retry (1-based), growing geometrically
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        Duration::from_millis((self.initial_backoff_ms as f64 * factor) as u64)
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Root directory holding one workspace per session
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Shared template assets linked read-only into each workspace
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,

    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,

    #[serde(default = "default_empty_max_age_hours")]
    pub empty_session_max_age_hours: u64,

    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/sessions")
}

fn default_id_prefix() -> String {
    "sess_".to_string()
}

fn default_empty_max_age_hours() -> u64 {
    24
}

fn default_title_max_chars() -> usize {
    200
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            templates_dir: None,
            id_prefix: default_id_prefix(),
            empty_session_max_age_hours: default_empty_max_age_hours(),
            title_max_chars: default_title_max_chars(),
        }
    }
}

/// OpenAI-compatible completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// Falls back to `OPENAI_API_KEY`
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_llm_retries")]
    pub max_retries: usize,
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_llm_retries() -> usize {
    2
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
        }
    }
}

/// Logging output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
