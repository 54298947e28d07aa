// Configuration File Support
//
// TOML configuration for the generation gate and publishing ledger, with
// environment variable overrides. The default file lives in the XDG config
// directory: ~/.config/banger/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::governor::DEFAULT_MONTHLY_WRITE_CEILING;
use crate::modes::{ModeTag, DEFAULT_MODES};
use crate::quota::DEFAULT_FREE_DAILY_LIMIT;

/// Longest accepted duplicate-post window (one year)
pub const MAX_DUPLICATE_WINDOW_HOURS: u64 = 24 * 365;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub quota: QuotaConfig,
    pub writes: WritesConfig,
    pub modes: ModesConfig,
    pub generation: GenerationConfig,
    pub publish: PublishConfig,
    pub storage: StorageConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Daily quota configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuotaConfig {
    /// Generations per UTC day for free accounts
    pub free_daily_limit: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_daily_limit: DEFAULT_FREE_DAILY_LIMIT,
        }
    }
}

/// Metered write configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WritesConfig {
    /// Aggregate metered writes per calendar month
    pub monthly_write_ceiling: u32,
}

impl Default for WritesConfig {
    fn default() -> Self {
        Self {
            monthly_write_ceiling: DEFAULT_MONTHLY_WRITE_CEILING,
        }
    }
}

/// Mode rotation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModesConfig {
    /// Ordered mode tags
    pub mode_set: Vec<String>,
}

impl Default for ModesConfig {
    fn default() -> Self {
        Self {
            mode_set: DEFAULT_MODES.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl ModesConfig {
    pub fn tags(&self) -> Vec<ModeTag> {
        self.mode_set.iter().map(|m| ModeTag::new(m.as_str())).collect()
    }
}

/// Inclusive clamping range, written as `[min, max]`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bounds(pub u32, pub u32);

impl Bounds {
    pub fn min(&self) -> u32 {
        self.0
    }

    pub fn max(&self) -> u32 {
        self.1
    }

    /// Clamp `value` into the range; an inverted range resolves to `max`
    pub fn clamp(&self, value: u32) -> u32 {
        value.max(self.0).min(self.1)
    }

    /// Parse `lo-hi`
    pub fn parse(s: &str) -> Option<Self> {
        let (lo, hi) = s.split_once('-')?;
        Some(Self(lo.trim().parse().ok()?, hi.trim().parse().ok()?))
    }
}

/// Generation request configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_options_bounds: Bounds,
    pub max_chars_bounds: Bounds,

    /// Used when the request does not say
    pub default_options: u32,
    pub default_max_chars: u32,

    /// Upper bound on one generator call
    pub timeout_secs: u64,

    /// Remote generator URL; the offline template generator is used if unset
    pub endpoint: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_options_bounds: Bounds(1, 5),
            max_chars_bounds: Bounds(50, 1000),
            default_options: 3,
            default_max_chars: 280,
            timeout_secs: 30,
            endpoint: None,
        }
    }
}

/// Publishing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublishConfig {
    /// Longest text accepted on the metered channel
    pub max_post_chars: u32,

    /// Same text may not go through the metered channel twice within this window
    pub duplicate_window_hours: u64,

    /// Upper bound on one publish API call
    pub timeout_secs: u64,

    /// Publish API URL; the metered channel is unavailable if unset
    pub endpoint: Option<String>,

    /// Bearer token for the publish API
    #[serde(skip_serializing)]
    pub bearer_token: Option<String>,

    /// Venue handed to users of the community channel
    pub community_url: Option<String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_post_chars: 280,
            duplicate_window_hours: 48,
            timeout_secs: 15,
            endpoint: None,
            bearer_token: None,
            community_url: None,
        }
    }
}

/// State persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON state file; defaults to the XDG data directory
    pub state_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolved_state_path(&self) -> PathBuf {
        if let Some(path) = &self.state_path {
            return path.clone();
        }
        match directories::ProjectDirs::from("com", "banger", "Banger") {
            Some(dirs) => dirs.data_dir().join("state.json"),
            None => PathBuf::from("data").join("banger_state.json"),
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// A missing file yields the defaults (plus environment overrides).
    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::config_path())
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or if
    /// the resulting configuration is invalid.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Default configuration file path
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "banger", "Banger") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("banger").join("config.toml")
        }
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    ///
    /// Recognised keys:
    /// - FREE_DAILY_LIMIT
    /// - MONTHLY_WRITE_CEILING
    /// - MODE_SET (comma-separated)
    /// - MAX_OPTIONS_BOUNDS, MAX_CHARS_BOUNDS (`lo-hi`)
    /// - BANGER_LOG_LEVEL, BANGER_LOG_FORMAT
    /// - BANGER_STATE_PATH
    /// - BANGER_GENERATOR_URL, BANGER_PUBLISH_URL
    /// - X_BEARER_TOKEN, X_COMMUNITY_URL
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(level) = lookup("BANGER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("BANGER_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Some(limit) = lookup("FREE_DAILY_LIMIT") {
            match limit.trim().parse::<u32>() {
                Ok(limit) if limit > 0 => self.quota.free_daily_limit = limit,
                _ => tracing::warn!("Ignoring invalid FREE_DAILY_LIMIT: {}", limit),
            }
        }
        if let Some(ceiling) = lookup("MONTHLY_WRITE_CEILING") {
            match ceiling.trim().parse::<u32>() {
                Ok(ceiling) if ceiling > 0 => self.writes.monthly_write_ceiling = ceiling,
                _ => tracing::warn!("Ignoring invalid MONTHLY_WRITE_CEILING: {}", ceiling),
            }
        }
        if let Some(modes) = lookup("MODE_SET") {
            let tags: Vec<String> = modes
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            if tags.len() >= 2 {
                self.modes.mode_set = tags;
            } else {
                tracing::warn!("Ignoring MODE_SET with fewer than two modes: {}", modes);
            }
        }
        if let Some(bounds) = lookup("MAX_OPTIONS_BOUNDS") {
            match Bounds::parse(&bounds) {
                Some(bounds) => self.generation.max_options_bounds = bounds,
                None => tracing::warn!("Ignoring invalid MAX_OPTIONS_BOUNDS: {}", bounds),
            }
        }
        if let Some(bounds) = lookup("MAX_CHARS_BOUNDS") {
            match Bounds::parse(&bounds) {
                Some(bounds) => self.generation.max_chars_bounds = bounds,
                None => tracing::warn!("Ignoring invalid MAX_CHARS_BOUNDS: {}", bounds),
            }
        }

        if let Some(path) = lookup("BANGER_STATE_PATH") {
            self.storage.state_path = Some(PathBuf::from(path));
        }
        if let Some(url) = lookup("BANGER_GENERATOR_URL") {
            self.generation.endpoint = Some(url);
        }
        if let Some(url) = lookup("BANGER_PUBLISH_URL") {
            self.publish.endpoint = Some(url);
        }
        if let Some(token) = lookup("X_BEARER_TOKEN") {
            self.publish.bearer_token = Some(token);
        }
        if let Some(url) = lookup("X_COMMUNITY_URL") {
            self.publish.community_url = Some(url);
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.quota.free_daily_limit == 0 {
            anyhow::bail!("Free daily limit must be > 0");
        }
        if self.writes.monthly_write_ceiling == 0 {
            anyhow::bail!("Monthly write ceiling must be > 0");
        }

        if self.modes.mode_set.len() < 2 {
            anyhow::bail!("Mode set must contain at least two modes");
        }
        let unique: HashSet<&String> = self.modes.mode_set.iter().collect();
        if unique.len() != self.modes.mode_set.len() {
            anyhow::bail!("Mode set contains duplicate tags");
        }
        if self.modes.mode_set.iter().any(|m| m.trim().is_empty()) {
            anyhow::bail!("Mode set contains an empty tag");
        }

        let gen = &self.generation;
        for (name, bounds) in [
            ("max_options_bounds", gen.max_options_bounds),
            ("max_chars_bounds", gen.max_chars_bounds),
        ] {
            if bounds.min() == 0 || bounds.min() > bounds.max() {
                anyhow::bail!("Invalid {}: [{}, {}]", name, bounds.min(), bounds.max());
            }
        }
        if gen.timeout_secs == 0 {
            anyhow::bail!("Generation timeout must be > 0");
        }

        if self.publish.max_post_chars == 0 {
            anyhow::bail!("Max post chars must be > 0");
        }
        if self.publish.duplicate_window_hours > MAX_DUPLICATE_WINDOW_HOURS {
            anyhow::bail!(
                "Duplicate window must be at most {} hours",
                MAX_DUPLICATE_WINDOW_HOURS
            );
        }
        if self.publish.timeout_secs == 0 {
            anyhow::bail!("Publish timeout must be > 0");
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}
