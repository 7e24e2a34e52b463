//! Configuration module for Waymark.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Waymark.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub location: LocationConfig,
    pub evaluator: EvaluatorConfig,
    pub queue: QueueConfig,
    pub sync: SyncConfig,
    pub remote: RemoteConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Location acquisition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Position backend: `geoclue` or `replay`.
    pub provider: String,
    /// JSONL fix script for the replay provider.
    pub replay_path: Option<PathBuf>,
    /// Minimum seconds between fixes requested from the provider.
    pub min_interval_secs: u64,
    /// Movement (in meters) below which a fix is not worth evaluating.
    pub min_displacement_m: f64,
    /// Number of recent fixes the sampler retains (drop-oldest).
    pub buffer_capacity: usize,
    /// Seconds after which a fix is considered stale.
    pub staleness_secs: u64,
}

/// Geofence evaluation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Consecutive fixes required to confirm a boundary crossing.
    pub debounce_fixes: u8,
    /// Grid index cell edge length in meters.
    pub grid_cell_m: u32,
}

/// Trigger queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Seconds before an unacknowledged delivery returns to Pending.
    pub retry_timeout_secs: u64,
    /// Days acknowledged triggers are kept before purging.
    pub purge_acknowledged_after_days: u32,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between periodic sync cycles.
    pub interval_secs: u64,
    /// Seconds to wait after a local edit before syncing (debounce).
    pub debounce_secs: u64,
    /// Base delay for failure backoff, in seconds.
    pub backoff_base_secs: u64,
    /// Backoff ceiling, in seconds.
    pub backoff_cap_secs: u64,
    /// Jitter applied to backoff delays (fraction, e.g. 0.2 for ±20%).
    pub backoff_jitter: f64,
    /// Maximum concurrent pushes per cycle.
    pub push_concurrency: u32,
    /// Consecutive failed cycles before observers hear SyncDegraded.
    pub degraded_after: u32,
}

/// Remote store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the Waymark API.
    pub base_url: String,
    /// API token. `None` falls back to `WAYMARK_API_TOKEN`, then the
    /// system keyring.
    pub api_token: Option<String>,
    /// Human-readable label for this device.
    pub device_name: String,
}

/// Local storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/waymark/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("waymark")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Config::default()
// ---------------------------------------------------------------------------

// Config derives Default because all its fields implement Default.
// (clippy::derivable_impls)

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            provider: "geoclue".to_string(),
            replay_path: None,
            min_interval_secs: 10,
            min_displacement_m: 100.0,
            buffer_capacity: 8,
            staleness_secs: 120,
        }
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            debounce_fixes: 2,
            grid_cell_m: 1000,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry_timeout_secs: 120,
            purge_acknowledged_after_days: 7,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            debounce_secs: 2,
            backoff_base_secs: 2,
            backoff_cap_secs: 300,
            backoff_jitter: 0.2,
            push_concurrency: 4,
            degraded_after: 5,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.waymark.app".to_string(),
            api_token: None,
            device_name: "waymark-linux".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("waymark");
        Self {
            db_path: data_dir.join("waymark.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.interval_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `location.provider`.
const VALID_PROVIDERS: &[&str] = &["geoclue", "replay"];

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- location ---
        if !VALID_PROVIDERS.contains(&self.location.provider.as_str()) {
            errors.push(ValidationError {
                field: "location.provider".into(),
                message: format!(
                    "invalid provider '{}'; valid options: {}",
                    self.location.provider,
                    VALID_PROVIDERS.join(", ")
                ),
            });
        }
        if self.location.provider == "replay" && self.location.replay_path.is_none() {
            errors.push(ValidationError {
                field: "location.replay_path".into(),
                message: "required when provider is 'replay'".into(),
            });
        }
        if self.location.buffer_capacity == 0 {
            errors.push(ValidationError {
                field: "location.buffer_capacity".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.location.staleness_secs == 0 {
            errors.push(ValidationError {
                field: "location.staleness_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if !self.location.min_displacement_m.is_finite() || self.location.min_displacement_m < 0.0
        {
            errors.push(ValidationError {
                field: "location.min_displacement_m".into(),
                message: "must be finite and non-negative".into(),
            });
        }

        // --- evaluator ---
        if self.evaluator.debounce_fixes == 0 {
            errors.push(ValidationError {
                field: "evaluator.debounce_fixes".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.evaluator.grid_cell_m < 100 || self.evaluator.grid_cell_m > 100_000 {
            errors.push(ValidationError {
                field: "evaluator.grid_cell_m".into(),
                message: "must be in range 100..=100000".into(),
            });
        }

        // --- queue ---
        if self.queue.retry_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "queue.retry_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- sync ---
        if self.sync.interval_secs == 0 {
            errors.push(ValidationError {
                field: "sync.interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.debounce_secs == 0 {
            errors.push(ValidationError {
                field: "sync.debounce_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.backoff_base_secs == 0 {
            errors.push(ValidationError {
                field: "sync.backoff_base_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.backoff_cap_secs < self.sync.backoff_base_secs {
            errors.push(ValidationError {
                field: "sync.backoff_cap_secs".into(),
                message: format!(
                    "backoff_cap_secs ({}) must not be below backoff_base_secs ({})",
                    self.sync.backoff_cap_secs, self.sync.backoff_base_secs
                ),
            });
        }
        if !self.sync.backoff_jitter.is_finite()
            || !(0.0..1.0).contains(&self.sync.backoff_jitter)
        {
            errors.push(ValidationError {
                field: "sync.backoff_jitter".into(),
                message: "must be in range 0.0..1.0".into(),
            });
        }
        if self.sync.push_concurrency == 0 || self.sync.push_concurrency > 32 {
            errors.push(ValidationError {
                field: "sync.push_concurrency".into(),
                message: "must be in range 1..=32".into(),
            });
        }
        if self.sync.degraded_after == 0 {
            errors.push(ValidationError {
                field: "sync.degraded_after".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- remote ---
        if !self.remote.base_url.starts_with("http://")
            && !self.remote.base_url.starts_with("https://")
        {
            errors.push(ValidationError {
                field: "remote.base_url".into(),
                message: format!("must be an http(s) URL, got '{}'", self.remote.base_url),
            });
        }
        if self.remote.device_name.trim().is_empty() {
            errors.push(ValidationError {
                field: "remote.device_name".into(),
                message: "must not be empty".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use waymark_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .location_provider("replay")
///     .location_replay_path(PathBuf::from("/tmp/fixes.jsonl"))
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- location ---

    pub fn location_provider(mut self, provider: impl Into<String>) -> Self {
        self.config.location.provider = provider.into();
        self
    }

    pub fn location_replay_path(mut self, path: PathBuf) -> Self {
        self.config.location.replay_path = Some(path);
        self
    }

    pub fn location_min_interval_secs(mut self, seconds: u64) -> Self {
        self.config.location.min_interval_secs = seconds;
        self
    }

    pub fn location_min_displacement_m(mut self, meters: f64) -> Self {
        self.config.location.min_displacement_m = meters;
        self
    }

    pub fn location_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.location.buffer_capacity = capacity;
        self
    }

    pub fn location_staleness_secs(mut self, seconds: u64) -> Self {
        self.config.location.staleness_secs = seconds;
        self
    }

    // --- evaluator ---

    pub fn evaluator_debounce_fixes(mut self, fixes: u8) -> Self {
        self.config.evaluator.debounce_fixes = fixes;
        self
    }

    pub fn evaluator_grid_cell_m(mut self, meters: u32) -> Self {
        self.config.evaluator.grid_cell_m = meters;
        self
    }

    // --- queue ---

    pub fn queue_retry_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.queue.retry_timeout_secs = seconds;
        self
    }

    pub fn queue_purge_acknowledged_after_days(mut self, days: u32) -> Self {
        self.config.queue.purge_acknowledged_after_days = days;
        self
    }

    // --- sync ---

    pub fn sync_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.interval_secs = seconds;
        self
    }

    pub fn sync_debounce_secs(mut self, seconds: u64) -> Self {
        self.config.sync.debounce_secs = seconds;
        self
    }

    pub fn sync_backoff_base_secs(mut self, seconds: u64) -> Self {
        self.config.sync.backoff_base_secs = seconds;
        self
    }

    pub fn sync_backoff_cap_secs(mut self, seconds: u64) -> Self {
        self.config.sync.backoff_cap_secs = seconds;
        self
    }

    pub fn sync_backoff_jitter(mut self, jitter: f64) -> Self {
        self.config.sync.backoff_jitter = jitter;
        self
    }

    pub fn sync_push_concurrency(mut self, n: u32) -> Self {
        self.config.sync.push_concurrency = n;
        self
    }

    pub fn sync_degraded_after(mut self, cycles: u32) -> Self {
        self.config.sync.degraded_after = cycles;
        self
    }

    // --- remote ---

    pub fn remote_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.base_url = url.into();
        self
    }

    pub fn remote_api_token(mut self, token: impl Into<String>) -> Self {
        self.config.remote.api_token = Some(token.into());
        self
    }

    pub fn remote_device_name(mut self, name: impl Into<String>) -> Self {
        self.config.remote.device_name = name.into();
        self
    }

    // --- storage ---

    pub fn storage_db_path(mut self, path: PathBuf) -> Self {
        self.config.storage.db_path = path;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
