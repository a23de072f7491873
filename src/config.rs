use anyhow::{Context, Result};
use log::{info, warn};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::utils::UrlUtils;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

pub const ENV_API_URL: &str = "THUMBNAIL_API_URL";
pub const ENV_POLL_INTERVAL_MS: &str = "THUMBNAIL_POLL_INTERVAL_MS";

/// Resolved client configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawConfig")]
pub struct Config {
    /// Base URL of the service, always ending in `/`
    pub api_endpoint: String,
    pub poll_interval: Duration,
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(rename = "API_ENDPOINT")]
    api_endpoint: String,
    #[serde(rename = "POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,
}

impl From<RawConfig> for Config {
    fn from(raw: RawConfig) -> Self {
        let poll_interval = raw
            .poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        Config::new(&raw.api_endpoint, poll_interval)
    }
}

impl Config {
    pub fn new(api_endpoint: &str, poll_interval: Duration) -> Self {
        if !UrlUtils::has_trailing_slash(api_endpoint) {
            warn!("API endpoint {} has no trailing slash, adding one", api_endpoint);
        }
        Self {
            api_endpoint: UrlUtils::normalize_base(api_endpoint),
            poll_interval,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid configuration document")
    }

    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json_str(&contents)
    }

    /// Fetch a `config.json` document over HTTP
    pub async fn fetch(url: &str) -> Result<Self> {
        let response = reqwest::get(url)
            .await
            .with_context(|| format!("Failed to fetch config from {}", url))?
            .error_for_status()
            .with_context(|| format!("Config endpoint {} returned an error", url))?;
        let contents = response.text().await?;
        Self::from_json_str(&contents)
    }

    /// Environment-provided default: `THUMBNAIL_API_URL` and optionally
    /// `THUMBNAIL_POLL_INTERVAL_MS`.
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var(ENV_API_URL)
            .with_context(|| format!("{} is not set", ENV_API_URL))?;

        let poll_interval = match std::env::var(ENV_POLL_INTERVAL_MS) {
            Ok(ms) => Duration::from_millis(
                ms.trim()
                    .parse()
                    .with_context(|| format!("{} must be a number of milliseconds", ENV_POLL_INTERVAL_MS))?,
            ),
            Err(_) => DEFAULT_POLL_INTERVAL,
        };

        Ok(Self::new(&endpoint, poll_interval))
    }
}

/// Where a [`ConfigProvider`] loads its configuration from
#[derive(Debug, Clone)]
pub enum ConfigSource {
    File(PathBuf),
    Url(String),
    Env,
}

/// Resolves the configuration once and hands out the same value afterwards.
///
/// The source is tried first, then the initial value if one was given, then the
/// environment.
#[derive(Debug)]
pub struct ConfigProvider {
    source: ConfigSource,
    initial_value: Option<Config>,
    resolved: OnceCell<Config>,
}

impl ConfigProvider {
    pub fn new(source: ConfigSource) -> Self {
        Self {
            source,
            initial_value: None,
            resolved: OnceCell::new(),
        }
    }

    pub fn with_initial_value(mut self, config: Config) -> Self {
        self.initial_value = Some(config);
        self
    }

    pub async fn get(&self) -> Result<&Config> {
        self.resolved.get_or_try_init(|| self.load()).await
    }

    pub fn is_loaded(&self) -> bool {
        self.resolved.initialized()
    }

    async fn load(&self) -> Result<Config> {
        let loaded = match &self.source {
            ConfigSource::File(path) => Config::from_file(path.clone()).await,
            ConfigSource::Url(url) => Config::fetch(url).await,
            ConfigSource::Env => Config::from_env(),
        };

        match loaded {
            Ok(config) => {
                info!("Loaded configuration from {:?}: {}", self.source, config.api_endpoint);
                Ok(config)
            }
            Err(e) => {
                warn!("Could not load configuration from {:?}: {:#}", self.source, e);
                if let Some(config) = &self.initial_value {
                    return Ok(config.clone());
                }
                Config::from_env().context("No configuration available")
            }
        }
    }
}
