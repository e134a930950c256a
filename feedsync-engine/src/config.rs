use feedsync_common::util::{NonPositiveDurationError, PositiveDuration};
use feedsync_store::http::DEFAULT_CONTENT_API_URL;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const ENV_PREFIX: &str = "FEEDSYNC_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("The subscription backoff must be positive: {0}")]
    Backoff(#[from] NonPositiveDurationError),
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub subscription_retry: bool,
    #[serde(default = "default_backoff_ms")]
    pub subscription_backoff_ms: u64,
    #[serde(default = "default_content_api_url")]
    pub content_api_url: String,
    #[serde(default = "default_content_api_timeout_ms")]
    pub content_api_timeout_ms: u64,
    #[serde(default = "default_write_ack_timeout_ms")]
    pub write_ack_timeout_ms: u64,
}

/// Whether and when a dropped store subscription is opened again.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct RetryPolicy {
    pub retry: bool,
    pub backoff: PositiveDuration,
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_content_api_url() -> String {
    DEFAULT_CONTENT_API_URL.to_owned()
}

fn default_content_api_timeout_ms() -> u64 {
    5000
}

fn default_write_ack_timeout_ms() -> u64 {
    2000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            subscription_retry: false,
            subscription_backoff_ms: default_backoff_ms(),
            content_api_url: default_content_api_url(),
            content_api_timeout_ms: default_content_api_timeout_ms(),
            write_ack_timeout_ms: default_write_ack_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Reads `FEEDSYNC_*` variables, after loading a `.env` file if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if e.not_found() {
                debug!("No .env file found");
            } else {
                return Err(e.into());
            }
        }

        let config = Self::from_vars(std::env::vars())?;
        debug!(?config, "Loaded engine config");
        Ok(config)
    }

    /// Reads the config from `FEEDSYNC_*` pairs and validates it.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(ENV_PREFIX).from_iter(vars)?;
        config.retry_policy()?;
        Ok(config)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, NonPositiveDurationError> {
        Ok(RetryPolicy {
            retry: self.subscription_retry,
            backoff: PositiveDuration::from_millis(self.subscription_backoff_ms)?,
        })
    }

    #[must_use]
    pub fn content_api_timeout(&self) -> Duration {
        Duration::from_millis(self.content_api_timeout_ms)
    }

    #[must_use]
    pub fn write_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.write_ack_timeout_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry: false,
            backoff: PositiveDuration::new_unchecked(time::Duration::milliseconds(1000)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{ConfigError, EngineConfig};

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[test]
    fn defaults_without_variables() {
        let config = EngineConfig::from_vars(vars(&[("UNRELATED", "1")])).unwrap();

        assert_eq!(config, EngineConfig::default());
        assert!(!config.retry_policy().unwrap().retry);
    }

    #[test]
    fn prefixed_variables_override_defaults() {
        let config = EngineConfig::from_vars(vars(&[
            ("FEEDSYNC_SUBSCRIPTION_RETRY", "true"),
            ("FEEDSYNC_SUBSCRIPTION_BACKOFF_MS", "250"),
            ("FEEDSYNC_CONTENT_API_URL", "http://localhost:3000"),
        ]))
        .unwrap();

        let policy = config.retry_policy().unwrap();
        assert!(policy.retry);
        assert_eq!(policy.backoff.to_std().as_millis(), 250);
        assert_eq!(config.content_api_url, "http://localhost:3000");
    }

    #[test]
    fn zero_backoff_is_rejected() {
        let result = EngineConfig::from_vars(vars(&[("FEEDSYNC_SUBSCRIPTION_BACKOFF_MS", "0")]));

        assert!(matches!(result, Err(ConfigError::Backoff(_))));
    }
}
