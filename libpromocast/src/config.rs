//! Configuration management for Promocast

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::types::PlatformKind;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "PROMOCAST_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub publishing: PublishingConfig,
    #[serde(default)]
    pub content: ContentConfig,
    pub twitter: Option<TwitterConfig>,
    pub facebook: Option<FacebookConfig>,
    pub mastodon: Option<MastodonConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub platforms: Vec<PlatformKind>,
    /// Delay before the first fire of a freshly armed platform timer
    #[serde(with = "humantime_duration")]
    pub grace_period: Duration,
    #[serde(with = "humantime_duration")]
    pub engagement_refresh_interval: Duration,
    #[serde(with = "humantime_duration")]
    pub engagement_first_run: Duration,
    /// How often the daemon reconciles timers with the database
    #[serde(with = "humantime_duration")]
    pub poll_interval: Duration,
    /// Offset of the local calendar day used for the daily cap
    pub utc_offset_hours: i32,
    pub candidate_pool_size: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            platforms: vec![
                PlatformKind::Instagram,
                PlatformKind::Facebook,
                PlatformKind::Twitter,
            ],
            grace_period: Duration::from_secs(60),
            engagement_refresh_interval: Duration::from_secs(3600),
            engagement_first_run: Duration::from_secs(300),
            poll_interval: Duration::from_secs(60),
            utc_offset_hours: 0,
            candidate_pool_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub min_rating: f64,
    pub min_sold_count: i64,
    pub repeat_window_days: u32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            min_rating: 4.0,
            min_sold_count: 100,
            repeat_window_days: 7,
        }
    }
}

/// What happens once a real provider has failed for good
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFailurePolicy {
    /// Fall back to a simulated publish
    #[default]
    Simulate,
    /// Record the post as failed with the provider's error
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishingConfig {
    pub simulation_success_rate: f64,
    #[serde(with = "humantime_duration")]
    pub provider_timeout: Duration,
    pub max_attempts: u32,
    /// Base delay of the exponential backoff between provider attempts
    #[serde(with = "humantime_duration")]
    pub retry_backoff: Duration,
    pub on_provider_failure: ProviderFailurePolicy,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            simulation_success_rate: 0.9,
            provider_timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            on_provider_failure: ProviderFailurePolicy::Simulate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub currency: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            currency: "R$".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitterConfig {
    #[serde(default = "default_twitter_api_base")]
    pub api_base: String,
    pub token_file: Option<String>,
}

fn default_twitter_api_base() -> String {
    "https://api.twitter.com".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacebookConfig {
    #[serde(default = "default_graph_base")]
    pub graph_base: String,
    pub page_id: String,
    pub token_file: Option<String>,
}

fn default_graph_base() -> String {
    "https://graph.facebook.com/v19.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MastodonConfig {
    pub instance: String,
    pub token_file: Option<String>,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/promocast/promocast.db".to_string(),
            },
            scheduler: SchedulerConfig::default(),
            selection: SelectionConfig::default(),
            publishing: PublishingConfig::default(),
            content: ContentConfig::default(),
            twitter: None,
            facebook: None,
            mastodon: None,
        }
    }

    fn validate(&self) -> Result<()> {
        let rate = self.publishing.simulation_success_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(invalid("publishing.simulation_success_rate", "must be between 0 and 1"));
        }
        if self.publishing.max_attempts == 0 {
            return Err(invalid("publishing.max_attempts", "must be at least 1"));
        }
        if self.publishing.provider_timeout.is_zero() {
            return Err(invalid("publishing.provider_timeout", "must be greater than zero"));
        }
        if self.scheduler.engagement_refresh_interval.is_zero() {
            return Err(invalid(
                "scheduler.engagement_refresh_interval",
                "must be greater than zero",
            ));
        }
        if self.scheduler.poll_interval.is_zero() {
            return Err(invalid("scheduler.poll_interval", "must be greater than zero"));
        }
        if !(-12..=14).contains(&self.scheduler.utc_offset_hours) {
            return Err(invalid("scheduler.utc_offset_hours", "must be between -12 and 14"));
        }
        if self.scheduler.candidate_pool_size == 0 {
            return Err(invalid("scheduler.candidate_pool_size", "must be at least 1"));
        }
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        Ok(())
    }

    /// Database path with `~` expanded
    pub fn database_path(&self) -> PathBuf {
        expand_path(&self.database.path)
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::PromocastError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(expand_path(&path));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("promocast").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("promocast"))
}

/// `"90s"`, `"5m"`, `"1h 30m"` in TOML, `Duration` in memory
mod humantime_duration {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}
