//! Console configuration: TOML file, then environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cemai_gateway::{ws_url_from_base, ClientConfig, GatewayResult, PushConfig};
use cemai_protocol::{
    Role, DECISION_POLL_INTERVAL_MS, DEFAULT_API_BASE_URL, HEALTH_POLL_INTERVAL_MS,
    KPI_POLL_INTERVAL_MS, LOG_BACKFILL_LIMIT, LOG_FEED_INTERVAL_MS, PING_INTERVAL_MS,
    WS_HEARTBEAT_INTERVAL_MS, WS_MAX_RECONNECT_ATTEMPTS, WS_RECONNECT_INTERVAL_MS,
};

pub const ENV_API_BASE_URL: &str = "CEMAI_API_BASE_URL";
pub const ENV_WS_URL: &str = "CEMAI_WS_URL";
pub const ENV_DEMO_FALLBACK: &str = "CEMAI_DEMO_FALLBACK";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    /// Push endpoint; derived from `base_url` when unset.
    pub ws_url: Option<String>,
    pub timeout_secs: u64,
    pub demo_fallback: bool,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_url: None,
            timeout_secs: 10,
            demo_fallback: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSection {
    pub decisions_ms: u64,
    pub kpis_ms: u64,
    pub health_ms: u64,
    pub ping_ms: u64,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            decisions_ms: DECISION_POLL_INTERVAL_MS,
            kpis_ms: KPI_POLL_INTERVAL_MS,
            health_ms: HEALTH_POLL_INTERVAL_MS,
            ping_ms: PING_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushSection {
    pub enabled: bool,
    pub reconnect_ms: u64,
    pub max_reconnect_attempts: u32,
    pub heartbeat_ms: u64,
}

impl Default for PushSection {
    fn default() -> Self {
        Self {
            enabled: true,
            reconnect_ms: WS_RECONNECT_INTERVAL_MS,
            max_reconnect_attempts: WS_MAX_RECONNECT_ATTEMPTS,
            heartbeat_ms: WS_HEARTBEAT_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFeedSection {
    /// Run the simulated master-control feed. It also starts whenever the
    /// backfill came from demo data.
    pub simulated: bool,
    pub interval_ms: u64,
    pub backfill: u32,
}

impl Default for LogFeedSection {
    fn default() -> Self {
        Self {
            simulated: false,
            interval_ms: LOG_FEED_INTERVAL_MS,
            backfill: LOG_BACKFILL_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorSection {
    /// Overrides the role reported by the backend for this session.
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub api: ApiSection,
    pub polling: PollingSection,
    pub push: PushSection,
    pub log_feed: LogFeedSection,
    pub operator: OperatorSection,
}

impl ConsoleConfig {
    /// `<config_dir>/cemai-control-tower/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cemai-control-tower").join("config.toml"))
    }

    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the file at `path`, or the default location when `None`.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::read_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text, path)?;
        tracing::debug!(path = %path.display(), "loaded console config");
        Ok(config)
    }

    /// Apply `CEMAI_*` overrides looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(url) = lookup(ENV_API_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.api.base_url = url.trim().to_string();
        }
        if let Some(url) = lookup(ENV_WS_URL).filter(|v| !v.trim().is_empty()) {
            self.api.ws_url = Some(url.trim().to_string());
        }
        if let Some(value) = lookup(ENV_DEMO_FALLBACK) {
            self.api.demo_fallback = parse_flag(&value).ok_or(ConfigError::InvalidEnv {
                var: ENV_DEMO_FALLBACK,
                value,
            })?;
        }
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.api.base_url.clone(),
            timeout: Duration::from_secs(self.api.timeout_secs.max(1)),
            demo_fallback: self.api.demo_fallback,
        }
    }

    pub fn push_config(&self) -> GatewayResult<PushConfig> {
        let url = match &self.api.ws_url {
            Some(url) => url.clone(),
            None => ws_url_from_base(&self.api.base_url)?,
        };
        let mut config = PushConfig::new(url);
        config.reconnect_interval = Duration::from_millis(self.push.reconnect_ms);
        config.max_reconnect_attempts = self.push.max_reconnect_attempts;
        config.heartbeat_interval = Duration::from_millis(self.push.heartbeat_ms.max(1));
        Ok(config)
    }

    pub fn decision_interval(&self) -> Duration {
        Duration::from_millis(self.polling.decisions_ms.max(1))
    }

    pub fn kpi_interval(&self) -> Duration {
        Duration::from_millis(self.polling.kpis_ms.max(1))
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.polling.health_ms.max(1))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.polling.ping_ms.max(1))
    }

    pub fn log_feed_interval(&self) -> Duration {
        Duration::from_millis(self.log_feed.interval_ms.max(1))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_fixed_intervals() {
        let config = ConsoleConfig::default();
        assert_eq!(config.decision_interval(), Duration::from_secs(3));
        assert_eq!(config.kpi_interval(), Duration::from_secs(5));
        assert_eq!(config.health_interval(), Duration::from_secs(10));
        assert_eq!(config.log_feed_interval(), Duration::from_millis(1500));
        assert!(config.api.demo_fallback);
        assert!(config.push.enabled);
        assert_eq!(config.push.max_reconnect_attempts, 10);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let text = r#"
            [api]
            base_url = "https://plant.example"
            demo_fallback = false

            [operator]
            role = "manager"
        "#;
        let config = ConsoleConfig::from_toml_str(text, Path::new("test.toml")).unwrap();
        assert_eq!(config.api.base_url, "https://plant.example");
        assert!(!config.api.demo_fallback);
        assert_eq!(config.api.timeout_secs, 10);
        assert_eq!(config.operator.role, Some(Role::Manager));
        assert_eq!(config.polling, PollingSection::default());
        assert_eq!(config.push_config().unwrap().url, "wss://plant.example/ws");
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            (ENV_API_BASE_URL, "http://10.0.0.5:8080"),
            (ENV_WS_URL, "ws://10.0.0.5:8081/push"),
            (ENV_DEMO_FALLBACK, "off"),
        ]
        .into_iter()
        .collect();

        let mut config = ConsoleConfig::default();
        config.apply_env(|var| env.get(var).map(|v| v.to_string())).unwrap();
        assert_eq!(config.client_config().base_url, "http://10.0.0.5:8080");
        assert!(!config.client_config().demo_fallback);
        assert_eq!(config.push_config().unwrap().url, "ws://10.0.0.5:8081/push");
    }

    #[test]
    fn bad_flag_is_rejected() {
        let mut config = ConsoleConfig::default();
        let err = config
            .apply_env(|var| (var == ENV_DEMO_FALLBACK).then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: ENV_DEMO_FALLBACK, .. }));
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(ConsoleConfig::load(Some(&missing)), Err(ConfigError::Io { .. })));

        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[polling]\nkpis_ms = 1000\n").unwrap();
        let config = ConsoleConfig::read_file(&path).unwrap();
        assert_eq!(config.kpi_interval(), Duration::from_secs(1));
    }
}
