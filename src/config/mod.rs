//! Configuration management for the usage harvester
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::harvest::PipelineConfig;
use crate::models::ProviderHarvestConfig;
use crate::planner::{PlannerConfig, MAX_RANGE_MONTHS};
use crate::utils::retry::RetryConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Harvest engine configuration
    #[serde(default)]
    pub harvest: HarvestConfig,

    /// Outbound HTTP configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Statically registered providers
    #[serde(default)]
    pub providers: Vec<ProviderHarvestConfig>,
}

/// Harvest engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Ranges in flight per provider run before any throttling
    pub max_concurrency: usize,

    /// Total attempts for a rate-limited range
    pub rate_limit_attempts: u32,

    /// Longest multi-month range to request
    pub max_range_months: u32,

    /// Provider sub-runs executing at once within a tenant job
    pub max_concurrent_providers: usize,

    /// Base backoff before retrying a rate-limited range
    pub rate_limit_backoff_ms: u64,

    /// Backoff ceiling
    pub max_backoff_ms: u64,

    /// Buffered records between pipeline and persistence
    pub channel_buffer_size: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            rate_limit_attempts: 3,
            max_range_months: MAX_RANGE_MONTHS,
            max_concurrent_providers: 2,
            rate_limit_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            channel_buffer_size: 256,
        }
    }
}

impl HarvestConfig {
    /// Pipeline settings derived from this section
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            max_concurrency: self.max_concurrency,
            rate_limit_attempts: self.rate_limit_attempts,
            backoff: RetryConfig::with_delays(
                self.rate_limit_attempts,
                self.rate_limit_backoff_ms,
                self.max_backoff_ms,
            ),
            channel_buffer_size: self.channel_buffer_size,
        }
    }

    /// Planner settings derived from this section
    pub fn planner(&self) -> PlannerConfig {
        PlannerConfig {
            max_range_months: self.max_range_months,
            ..PlannerConfig::default()
        }
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Rate limit (requests per second) per fetcher
    pub requests_per_second: u32,

    /// User agent string
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            requests_per_second: 2,
            user_agent: format!("usage-harvester/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/harvester.db"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Providers cannot be expressed through the environment; use a file.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let harvest = HarvestConfig {
            max_concurrency: env_parse("HARVESTER_MAX_CONCURRENCY")
                .unwrap_or(defaults.harvest.max_concurrency),
            rate_limit_attempts: env_parse("HARVESTER_RATE_LIMIT_ATTEMPTS")
                .unwrap_or(defaults.harvest.rate_limit_attempts),
            max_range_months: env_parse("HARVESTER_MAX_RANGE_MONTHS")
                .unwrap_or(defaults.harvest.max_range_months),
            max_concurrent_providers: env_parse("HARVESTER_MAX_CONCURRENT_PROVIDERS")
                .unwrap_or(defaults.harvest.max_concurrent_providers),
            rate_limit_backoff_ms: env_parse("HARVESTER_RATE_LIMIT_BACKOFF_MS")
                .unwrap_or(defaults.harvest.rate_limit_backoff_ms),
            max_backoff_ms: env_parse("HARVESTER_MAX_BACKOFF_MS")
                .unwrap_or(defaults.harvest.max_backoff_ms),
            channel_buffer_size: env_parse("HARVESTER_CHANNEL_BUFFER_SIZE")
                .unwrap_or(defaults.harvest.channel_buffer_size),
        };

        let http = HttpConfig {
            request_timeout_secs: env_parse("HARVESTER_REQUEST_TIMEOUT")
                .unwrap_or(defaults.http.request_timeout_secs),
            requests_per_second: env_parse("HARVESTER_REQUESTS_PER_SECOND")
                .unwrap_or(defaults.http.requests_per_second),
            user_agent: std::env::var("HARVESTER_USER_AGENT").unwrap_or(defaults.http.user_agent),
        };

        let sqlite_path = std::env::var("HARVESTER_SQLITE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.database.sqlite_path);

        let logging = LoggingConfig {
            level: std::env::var("HARVESTER_LOG_LEVEL").unwrap_or(defaults.logging.level),
            format: std::env::var("HARVESTER_LOG_FORMAT").unwrap_or(defaults.logging.format),
        };

        Ok(Self {
            harvest,
            http,
            database: DatabaseConfig { sqlite_path },
            logging,
            providers: Vec::new(),
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.harvest.max_concurrency == 0 {
            anyhow::bail!("max_concurrency must be greater than 0");
        }

        if self.harvest.rate_limit_attempts == 0 {
            anyhow::bail!("rate_limit_attempts must be greater than 0");
        }

        if self.harvest.max_range_months == 0 {
            anyhow::bail!("max_range_months must be greater than 0");
        }

        if self.harvest.max_concurrent_providers == 0 {
            anyhow::bail!("max_concurrent_providers must be greater than 0");
        }

        if self.harvest.channel_buffer_size == 0 {
            anyhow::bail!("channel_buffer_size must be greater than 0");
        }

        if self.http.requests_per_second == 0 {
            anyhow::bail!("requests_per_second must be positive");
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if !seen.insert((&provider.tenant_id, &provider.provider_id)) {
                anyhow::bail!(
                    "provider '{}' is declared twice for tenant '{}'",
                    provider.provider_id,
                    provider.tenant_id
                );
            }
        }

        Ok(())
    }
}
