//! ==============================================================================
//! config.rs - Console Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `console.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - GatewayConfig: Base URL of the sensor gateway and request timeout.
//!     - CacheConfig: Retry policy for failed reads.
//!     - PollingConfig: Background revalidation of the selected sensor.
//!     - LoggingConfig: Default log level when RUST_LOG is unset.
//!
//! environment:
//!     - SENSOR_GATEWAY_URL overrides gateway.base_url
//!
//! ==============================================================================

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::RetryPolicy;

pub const GATEWAY_URL_ENV: &str = "SENSOR_GATEWAY_URL";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// file this config was read from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub retries: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PollingConfig {
    /// 0 disables background revalidation
    pub interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

fn default_timeout_seconds() -> u64 {
    10
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { retries: 2, retry_delay_ms: 250 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl CacheConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            base_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_seconds > 0).then(|| Duration::from_secs(self.interval_seconds))
    }
}

impl ConsoleConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file {}", path.as_ref().display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: ConsoleConfig = toml::from_str(content).context("failed to parse config")?;
        Ok(config)
    }

    /// Load with default fallback, then apply environment overrides
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("console.toml"),
            PathBuf::from("..").join("config").join("console.toml"),
        ];

        let mut config = None;
        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(mut c) => {
                        tracing::info!("[CONFIG] Loaded from {}", path.display());
                        c.source = Some(path.clone());
                        config = Some(c);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("[CONFIG] Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        let mut config = config.unwrap_or_else(|| {
            tracing::warn!("[CONFIG] No config file found - using defaults");
            Self::default()
        });
        config.apply_env(std::env::var(GATEWAY_URL_ENV).ok());
        config
    }

    fn apply_env(&mut self, gateway_url: Option<String>) {
        if let Some(url) = gateway_url.filter(|u| !u.trim().is_empty()) {
            self.gateway.base_url = url;
        }
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        let source = self
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults".to_string());
        tracing::info!(
            %source,
            gateway = %self.gateway.base_url,
            timeout_s = self.gateway.timeout_seconds,
            retries = self.cache.retries,
            poll_interval_s = self.polling.interval_seconds,
            "console configuration"
        );
    }
}
