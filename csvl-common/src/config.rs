//! Configuration loading and config path resolution
//!
//! A run is described by a single TOML file. Every section except `[input]`
//! and `[output]` is optional and falls back to built-in defaults.
//!
//! # Config path priority
//!
//! 1. Command-line argument (highest priority)
//! 2. `CSVL_CONFIG` environment variable
//! 3. `<user config dir>/csvl/config.toml`
//!
//! # API key priority
//!
//! 1. `OPERATOR_API_KEY` environment variable
//! 2. `remote.api_key` in the TOML file

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "CSVL_CONFIG";

/// Environment variable holding the operator API key
pub const API_KEY_ENV_VAR: &str = "OPERATOR_API_KEY";

/// Complete loader configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Where the run summary is written
    #[serde(default = "default_stats_file")]
    pub stats_file: PathBuf,

    /// Source data and its row schema
    pub input: InputConfig,

    /// Mapping table, document schema and remote target settings
    pub output: OutputConfig,

    /// Remote API endpoint settings
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Chunking settings for the batch orchestrator
    #[serde(default)]
    pub batch: BatchConfig,

    /// Backoff settings for remote calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[input]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// CSV file with a header row
    pub data: PathBuf,
    /// JSON Schema every row must satisfy
    pub schema: PathBuf,
}

/// `[output]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// JSON object mapping CSV headers to target paths
    pub mapping: PathBuf,

    /// JSON Schema every mapped document must satisfy
    pub schema: PathBuf,

    /// Project every upserted resource is scoped to (created if missing)
    pub project_name: String,

    /// Remote resource type (`product`, `thng`, `collection`)
    #[serde(default = "default_resource_type")]
    pub resource_type: String,

    /// Field used to match existing resources. `name` matches by name,
    /// anything else matches by `identifiers.<update_key>`.
    #[serde(default = "default_update_key")]
    pub update_key: String,

    /// Field every mapped document must carry a non-empty value for
    #[serde(default = "default_identity_field")]
    pub identity_field: String,

    /// Redirect URL applied when a document carries no `redirectUrl` of its own
    #[serde(default)]
    pub default_redirect_url: Option<String>,

    /// Download the QR image of every provisioned redirector
    #[serde(default)]
    pub download_qr_codes: bool,

    /// Directory QR images are written to
    #[serde(default = "default_qr_output_dir")]
    pub qr_output_dir: PathBuf,

    /// QR image URL with `{shortDomain}` and `{shortId}` placeholders
    #[serde(default = "default_qr_image_template")]
    pub qr_image_template: String,
}

/// `[remote]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the remote API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Operator API key; `OPERATOR_API_KEY` takes priority
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// `[batch]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Resources dispatched together (peak in-flight upserts)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Index of the first resource to process (resume point)
    #[serde(default)]
    pub resume_from: usize,
}

/// `[retry]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per remote call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for any single delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Growth factor between delays
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr only if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_stats_file() -> PathBuf {
    PathBuf::from("stats.txt")
}

fn default_resource_type() -> String {
    "product".to_string()
}

fn default_update_key() -> String {
    "name".to_string()
}

fn default_identity_field() -> String {
    "name".to_string()
}

fn default_qr_output_dir() -> PathBuf {
    PathBuf::from("qr")
}

fn default_qr_image_template() -> String {
    "https://{shortDomain}/{shortId}.png?h=512&w=512".to_string()
}

fn default_api_url() -> String {
    "https://api.evrythng.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_concurrency() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            resume_from: 0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl TomlConfig {
    /// Parse a TOML document without touching the filesystem
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load, validate and anchor a config file
    ///
    /// Relative paths inside the file are resolved against the directory the
    /// file lives in, so a config can be run from any working directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_toml_str(&content)?;

        if let Some(base) = path.parent() {
            config.anchor_paths(base);
        }

        info!(config = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Check value ranges serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.output.project_name.trim().is_empty() {
            return Err(Error::Config("output.project_name must not be empty".to_string()));
        }
        if self.output.update_key.trim().is_empty() {
            return Err(Error::Config("output.update_key must not be empty".to_string()));
        }
        if self.output.identity_field.trim().is_empty() {
            return Err(Error::Config("output.identity_field must not be empty".to_string()));
        }
        if self.batch.concurrency == 0 {
            return Err(Error::Config("batch.concurrency must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(Error::Config(format!(
                "retry.multiplier must be >= 1.0 (got {})",
                self.retry.multiplier
            )));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(Error::Config(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the operator API key
    pub fn resolve_api_key(&self) -> Result<String> {
        let env_key = std::env::var(API_KEY_ENV_VAR).ok();
        let toml_key = self.remote.api_key.as_ref();

        if let (Some(e), Some(t)) = (&env_key, toml_key) {
            if is_valid_key(e) && is_valid_key(t) && e != t {
                warn!("API key found in environment and TOML; using {}", API_KEY_ENV_VAR);
            }
        }

        if let Some(key) = env_key {
            if is_valid_key(&key) {
                debug!("API key loaded from environment variable");
                return Ok(key);
            }
        }

        if let Some(key) = toml_key {
            if is_valid_key(key) {
                debug!("API key loaded from TOML config");
                return Ok(key.clone());
            }
        }

        Err(Error::Config(format!(
            "Operator API key not configured. Export {} or set remote.api_key",
            API_KEY_ENV_VAR
        )))
    }

    fn anchor_paths(&mut self, base: &Path) {
        let anchor = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        anchor(&mut self.stats_file);
        anchor(&mut self.input.data);
        anchor(&mut self.input.schema);
        anchor(&mut self.output.mapping);
        anchor(&mut self.output.schema);
        anchor(&mut self.output.qr_output_dir);
        if let Some(file) = self.logging.file.as_mut() {
            anchor(file);
        }
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve which config file to load
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    // Priority 3: user config directory
    let default_path = default_config_path()
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    if default_path.exists() {
        Ok(default_path)
    } else {
        Err(Error::Config(format!(
            "No config file given and {} does not exist",
            default_path.display()
        )))
    }
}

/// `<config dir>/csvl/config.toml` for the current platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("csvl").join("config.toml"))
}
