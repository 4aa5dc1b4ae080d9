//! Worker process configuration.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Process-level configuration loaded from environment variables.
///
/// Environment variables are prefixed with `DOCFLOW_`:
/// - `DOCFLOW_WORKER_ID`: Identifier used in log fields (default: random UUID)
/// - `DOCFLOW_SETTINGS_PATH`: Domain settings YAML (default: "config/settings.yaml")
/// - `DOCFLOW_STATE_PATH`: Persisted lock/cursor file (default: "state/docflow_state.json")
/// - `DOCFLOW_TICK_INTERVAL_SECS`: Scheduler interval (default: 60)
/// - `DOCFLOW_CONNECT_TIMEOUT_SECS`: Outbound connect timeout (default: 10)
/// - `DOCFLOW_REQUEST_TIMEOUT_SECS`: Outbound request timeout (default: 300)
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Worker identifier.
    #[serde(default = "default_worker_id")]
    pub worker_id: String,

    /// Path of the domain settings document.
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,

    /// Path of the persisted state file.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Seconds between scheduler ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Connect timeout for outbound HTTP calls, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Total timeout for outbound HTTP calls, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_worker_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("config/settings.yaml")
}

fn default_state_path() -> PathBuf {
    PathBuf::from("state/docflow_state.json")
}

fn default_tick_interval() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    300
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("DOCFLOW_").from_env::<WorkerConfig>()
    }

    /// Interval between scheduler ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    /// HTTP timeouts applied to every outbound client.
    pub fn http_timeouts(&self) -> HttpTimeouts {
        HttpTimeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            request: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            settings_path: default_settings_path(),
            state_path: default_state_path(),
            tick_interval_secs: default_tick_interval(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Connect and request timeouts for outbound HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl HttpTimeouts {
    /// Build a reqwest client with these timeouts.
    pub fn client_builder(&self) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .connect_timeout(self.connect)
            .timeout(self.request)
    }
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        WorkerConfig::default().http_timeouts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.settings_path, PathBuf::from("config/settings.yaml"));
        assert_eq!(config.tick_interval(), Duration::from_secs(60));
        assert!(!config.worker_id.is_empty());
    }

    #[test]
    fn test_http_timeouts() {
        let config = WorkerConfig {
            connect_timeout_secs: 3,
            request_timeout_secs: 30,
            ..WorkerConfig::default()
        };
        let timeouts = config.http_timeouts();
        assert_eq!(timeouts.connect, Duration::from_secs(3));
        assert_eq!(timeouts.request, Duration::from_secs(30));
    }

    #[test]
    fn test_tick_interval_never_zero() {
        let config = WorkerConfig {
            tick_interval_secs: 0,
            ..WorkerConfig::default()
        };
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
    }
}
