use crate::error::{Result, RotatifyError};
use std::env;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Rotation configuration
    pub rotation: RotationConfig,
    /// Outbound HTTP configuration
    pub client: HttpClientConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Proxy addresses in rotation order (comma-separated in the environment)
    pub proxies: Vec<String>,
    /// URL fetched on every tick
    pub target_url: String,
    /// Time between rotations (default: 600s)
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Connection timeout (default: 10s)
    pub connect_timeout: Duration,
    /// Request timeout, body included (default: 30s)
    pub request_timeout: Duration,
    /// Upper bound for one tick's action (default: 60s)
    pub action_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rotation: RotationConfig {
                proxies: Vec::new(),
                target_url: "https://api.ipify.org".to_string(),
                interval: Duration::from_secs(600),
            },
            client: HttpClientConfig {
                connect_timeout: Duration::from_secs(10),
                request_timeout: Duration::from_secs(30),
                action_timeout: Duration::from_secs(60),
            },
            log: LogConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let target_url = get_env_or("ROTATIFY_TARGET_URL", &defaults.rotation.target_url);
        Url::parse(&target_url).map_err(|e| {
            RotatifyError::InvalidConfig(format!("ROTATIFY_TARGET_URL must be a valid URL: {}", e))
        })?;

        let interval = get_secs_or("ROTATIFY_ROTATE_INTERVAL", 600)?;
        if interval.is_zero() {
            return Err(RotatifyError::InvalidConfig(
                "ROTATIFY_ROTATE_INTERVAL must be greater than zero".into(),
            ));
        }

        Ok(Config {
            rotation: RotationConfig {
                proxies: get_env_or("ROTATIFY_PROXIES", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                target_url,
                interval,
            },
            client: HttpClientConfig {
                connect_timeout: get_secs_or("ROTATIFY_CONNECT_TIMEOUT", 10)?,
                request_timeout: get_secs_or("ROTATIFY_REQUEST_TIMEOUT", 30)?,
                action_timeout: get_secs_or("ROTATIFY_ACTION_TIMEOUT", 60)?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", &defaults.log.level),
                format: get_env_or("LOG_FORMAT", &defaults.log.format),
            },
        })
    }

    /// Whether logs should be emitted as JSON
    pub fn json_logs(&self) -> bool {
        self.log.format.eq_ignore_ascii_case("json")
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read a whole number of seconds
fn get_secs_or(key: &str, default: u64) -> Result<Duration> {
    let raw = get_env_or(key, &default.to_string());
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| {
            RotatifyError::InvalidConfig(format!("{} must be a whole number of seconds", key))
        })
}
