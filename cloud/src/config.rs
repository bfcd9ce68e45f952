//! Provider configuration
//!
//! Settings come from the caller or from `CLOUD_*` environment variables.
//! Budgets are plain seconds in the environment.

use converge::{Backoff, Timeouts, READ_RETRY_TIMEOUT, WRITE_RETRY_TIMEOUT};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const ENV_ENDPOINT: &str = "CLOUD_ENDPOINT";
pub const ENV_SECRET_ID: &str = "CLOUD_SECRET_ID";
pub const ENV_SECRET_KEY: &str = "CLOUD_SECRET_KEY";
pub const ENV_REGION: &str = "CLOUD_REGION";
pub const ENV_INSECURE: &str = "CLOUD_INSECURE";
pub const ENV_READ_RETRY_TIMEOUT: &str = "CLOUD_READ_RETRY_TIMEOUT";
pub const ENV_WRITE_RETRY_TIMEOUT: &str = "CLOUD_WRITE_RETRY_TIMEOUT";
pub const ENV_POLL_INTERVAL: &str = "CLOUD_POLL_INTERVAL";
pub const ENV_SETTLE_DELAY: &str = "CLOUD_SETTLE_DELAY";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Instance status lags a create or resize by a few seconds.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} is required (set in provider config or {var} env var)")]
    Missing {
        field: &'static str,
        var: &'static str,
    },

    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },
}

#[derive(Clone)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub secret_id: String,
    pub secret_key: String,
    pub region: Option<String>,
    pub insecure: bool,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub settle_delay: Duration,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("endpoint", &self.endpoint)
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("insecure", &self.insecure)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("request_timeout", &self.request_timeout)
            .field("settle_delay", &self.settle_delay)
            .finish()
    }
}

impl ProviderConfig {
    /// Configuration with default budgets.
    pub fn new(
        endpoint: impl Into<String>,
        secret_id: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
            region: None,
            insecure: false,
            read_timeout: READ_RETRY_TIMEOUT,
            write_timeout: WRITE_RETRY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Read the configuration from `CLOUD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = required("endpoint", ENV_ENDPOINT)?;
        let secret_id = required("secret_id", ENV_SECRET_ID)?;
        let secret_key = required("secret_key", ENV_SECRET_KEY)?;

        let mut config = Self::new(endpoint, secret_id, secret_key);
        config.region = optional(ENV_REGION);

        if let Some(value) = optional(ENV_INSECURE) {
            config.insecure = value
                .parse::<bool>()
                .map_err(|_| ConfigError::InvalidValue {
                    var: ENV_INSECURE,
                    value,
                })?;
        }
        if let Some(timeout) = seconds(ENV_READ_RETRY_TIMEOUT)? {
            config.read_timeout = timeout;
        }
        if let Some(timeout) = seconds(ENV_WRITE_RETRY_TIMEOUT)? {
            config.write_timeout = timeout;
        }
        if let Some(interval) = seconds(ENV_POLL_INTERVAL)? {
            config.poll_interval = interval;
        }
        if let Some(delay) = seconds(ENV_SETTLE_DELAY)? {
            config.settle_delay = delay;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check required settings and the endpoint URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_id.is_empty() {
            return Err(ConfigError::Missing {
                field: "secret_id",
                var: ENV_SECRET_ID,
            });
        }
        if self.secret_key.is_empty() {
            return Err(ConfigError::Missing {
                field: "secret_key",
                var: ENV_SECRET_KEY,
            });
        }

        let url = url::Url::parse(&self.endpoint).map_err(|e| ConfigError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                var: ENV_POLL_INTERVAL,
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Engine budgets derived from this configuration.
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            read: self.read_timeout,
            write: self.write_timeout,
            poll_interval: self.poll_interval,
            backoff: Backoff::default(),
        }
    }
}

fn optional(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

fn required(field: &'static str, var: &'static str) -> Result<String, ConfigError> {
    optional(var).ok_or(ConfigError::Missing { field, var })
}

fn seconds(var: &'static str) -> Result<Option<Duration>, ConfigError> {
    match optional(var) {
        None => Ok(None),
        Some(value) => value
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}
