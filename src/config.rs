//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Relay configuration, read from the environment with defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Directory holding per-account platform session artifacts.
    pub sessions_dir: PathBuf,
    /// Base URL of the platform session bridge.
    pub platform_url: String,
    /// Topic classification endpoint.
    pub classifier_url: String,
    /// Text rewrite endpoint.
    pub rewrite_url: String,
    /// Image generation service base URL.
    pub image_url: String,
    /// Image service key header value.
    pub image_api_key: SecretString,
    /// Image service secret header value.
    pub image_api_secret: SecretString,
    /// Request timeout applied to every external-service call.
    pub http_timeout: Duration,
    /// Bound on concurrent external-service calls.
    pub worker_pool_size: usize,
    /// Image generation knobs.
    pub image: ImageOptions,
}

/// Image generation parameters and polling bounds.
#[derive(Debug, Clone)]
pub struct ImageOptions {
    pub width: u32,
    pub height: u32,
    pub count: u32,
    /// Maximum number of status polls before giving up.
    pub poll_attempts: u32,
    /// Fixed delay between status polls.
    pub poll_delay: Duration,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            count: 1,
            poll_attempts: 10,
            poll_delay: Duration::from_secs(3),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/relay.db"),
            sessions_dir: PathBuf::from("./data/sessions"),
            platform_url: "http://localhost:8081".to_string(),
            classifier_url: "http://localhost:5000/predict_topics".to_string(),
            rewrite_url: "http://localhost:5000/rewrite".to_string(),
            image_url: "http://localhost:5001".to_string(),
            image_api_key: SecretString::from(String::new()),
            image_api_secret: SecretString::from(String::new()),
            http_timeout: Duration::from_secs(30),
            worker_pool_size: 5,
            image: ImageOptions::default(),
        }
    }
}

impl RelayConfig {
    /// Build a config from environment variables, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let db_path = env_or("RELAY_DB_PATH", &defaults.db_path.display().to_string());
        let sessions_dir = env_or(
            "RELAY_SESSIONS_DIR",
            &defaults.sessions_dir.display().to_string(),
        );

        let http_timeout_secs = parse_env("RELAY_HTTP_TIMEOUT_SECS", 30u64)?;
        let worker_pool_size = parse_env("RELAY_WORKER_POOL_SIZE", defaults.worker_pool_size)?;

        let image = ImageOptions {
            width: parse_env("RELAY_IMAGE_WIDTH", defaults.image.width)?,
            height: parse_env("RELAY_IMAGE_HEIGHT", defaults.image.height)?,
            count: defaults.image.count,
            poll_attempts: parse_env("RELAY_IMAGE_POLL_ATTEMPTS", defaults.image.poll_attempts)?,
            poll_delay: Duration::from_secs(parse_env("RELAY_IMAGE_POLL_DELAY_SECS", 3u64)?),
        };

        Ok(Self {
            db_path: PathBuf::from(db_path),
            sessions_dir: PathBuf::from(sessions_dir),
            platform_url: env_or("RELAY_PLATFORM_URL", &defaults.platform_url),
            classifier_url: env_or("RELAY_CLASSIFIER_URL", &defaults.classifier_url),
            rewrite_url: env_or("RELAY_REWRITE_URL", &defaults.rewrite_url),
            image_url: env_or("RELAY_IMAGE_URL", &defaults.image_url),
            image_api_key: SecretString::from(env_or("RELAY_IMAGE_API_KEY", "")),
            image_api_secret: SecretString::from(env_or("RELAY_IMAGE_API_SECRET", "")),
            http_timeout: Duration::from_secs(http_timeout_secs),
            worker_pool_size,
            image,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}
