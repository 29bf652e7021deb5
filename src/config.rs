//! Pub/Sub adapter configuration
//!
//! Configuration is resolved once, when the client is built. Explicit values
//! win over environment-derived defaults, and nothing reads the environment
//! at publish time.

use crate::error::{PubSubError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn checked_duration(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| {
        PubSubError::Config(format!("{name} is not a valid duration ({secs} s): {e}"))
    })
}

/// Seconds to [`Duration`] without panicking: negative and NaN become zero,
/// overflow becomes [`Duration::MAX`].
pub(crate) fn saturating_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Production Pub/Sub REST endpoint
pub const DEFAULT_API_ROOT: &str = "https://pubsub.googleapis.com/v1";

pub const ENV_PROJECT: &str = "GCP_PROJECT";
pub const ENV_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const ENV_EMULATOR_HOST: &str = "PUBSUB_EMULATOR_HOST";
pub const ENV_TIMEOUT_SECS: &str = "PUBSUB_TIMEOUT_SECS";
pub const ENV_PUBLISH_TIMEOUT_SECS: &str = "PUBSUB_PUBLISH_TIMEOUT_SECS";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "PUBSUB_RETRY_MAX_ATTEMPTS";
pub const ENV_RETRY_INITIAL_DELAY_SECS: &str = "PUBSUB_RETRY_INITIAL_DELAY_SECS";
pub const ENV_RETRY_MAX_DELAY_SECS: &str = "PUBSUB_RETRY_MAX_DELAY_SECS";
pub const ENV_RETRY_JITTER: &str = "PUBSUB_RETRY_JITTER";

/// Request timeout settings
///
/// `total` is the whole-request budget in seconds (connect, send and read).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RequestTimeout {
    pub total: f64,
}

impl RequestTimeout {
    /// Session-level default: 60 seconds
    pub const SESSION_DEFAULT: RequestTimeout = RequestTimeout { total: 60.0 };

    /// Per-publish-call default: 30 seconds
    pub const PUBLISH_DEFAULT: RequestTimeout = RequestTimeout { total: 30.0 };

    pub fn secs(total: f64) -> Self {
        Self { total }
    }

    /// `total` as a [`Duration`], saturating at zero and [`Duration::MAX`]
    /// for values that did not pass validation.
    pub fn as_duration(&self) -> Duration {
        saturating_duration(self.total)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !self.total.is_finite() || self.total <= 0.0 {
            return Err(PubSubError::Config(format!(
                "{name} must be a positive number of seconds, got {}",
                self.total
            )));
        }
        checked_duration(name, self.total)?;
        Ok(())
    }
}

/// Retry settings for the publish call
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay before the first retry, in seconds
    pub initial_delay_secs: f64,

    /// Upper bound for any single delay, in seconds
    pub max_delay_secs: f64,

    /// Random extra delay as a fraction of the computed delay
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_secs: 4.0,
            max_delay_secs: 60.0,
            jitter: 0.5,
        }
    }
}

impl RetryConfig {
    /// Validate retry settings
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(PubSubError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("initial_delay_secs", self.initial_delay_secs),
            ("max_delay_secs", self.max_delay_secs),
            ("jitter", self.jitter),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PubSubError::Config(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        checked_duration("initial_delay_secs", self.initial_delay_secs)?;
        checked_duration("max_delay_secs", self.max_delay_secs)?;
        if self.initial_delay_secs > self.max_delay_secs {
            return Err(PubSubError::Config(
                "initial_delay_secs cannot exceed max_delay_secs".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pub/Sub publisher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PubSubConfig {
    /// Default GCP project for topic resolution
    pub project: Option<String>,

    /// Path to a Google credentials JSON file
    pub credentials_file: Option<PathBuf>,

    /// Static OAuth bearer token; takes precedence over the credentials file
    pub token: Option<String>,

    /// REST API root; `None` picks the emulator or the production endpoint
    pub api_root: Option<String>,

    /// Emulator `host:port`; requests go over plain HTTP without auth
    pub emulator_host: Option<String>,

    /// Session-wide request timeout
    pub session_timeout: RequestTimeout,

    /// Default timeout of a single publish call
    pub publish_timeout: RequestTimeout,

    /// Retry policy for transient publish failures
    pub retry: RetryConfig,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            project: None,
            credentials_file: None,
            token: None,
            api_root: None,
            emulator_host: None,
            session_timeout: RequestTimeout::SESSION_DEFAULT,
            publish_timeout: RequestTimeout::PUBLISH_DEFAULT,
            retry: RetryConfig::default(),
        }
    }
}

impl PubSubConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if matches!(self.project.as_deref(), Some("")) {
            return Err(PubSubError::Config("project cannot be empty".to_string()));
        }
        if matches!(self.token.as_deref(), Some("")) {
            return Err(PubSubError::Config("token cannot be empty".to_string()));
        }
        if matches!(self.api_root.as_deref(), Some("")) {
            return Err(PubSubError::Config("api_root cannot be empty".to_string()));
        }
        if matches!(self.emulator_host.as_deref(), Some("")) {
            return Err(PubSubError::Config(
                "emulator_host cannot be empty".to_string(),
            ));
        }
        self.session_timeout.validate("session_timeout")?;
        self.publish_timeout.validate("publish_timeout")?;
        self.retry.validate()
    }

    /// Create configuration from environment variables
    ///
    /// # Environment Variables
    /// - `GCP_PROJECT`: default project
    /// - `GOOGLE_APPLICATION_CREDENTIALS`: credentials file path
    /// - `PUBSUB_EMULATOR_HOST`: emulator `host:port`
    /// - `PUBSUB_TIMEOUT_SECS` / `PUBSUB_PUBLISH_TIMEOUT_SECS`: timeouts
    /// - `PUBSUB_RETRY_MAX_ATTEMPTS`, `PUBSUB_RETRY_INITIAL_DELAY_SECS`,
    ///   `PUBSUB_RETRY_MAX_DELAY_SECS`, `PUBSUB_RETRY_JITTER`: retry policy
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup
    ///
    /// Unset and empty variables fall back to defaults. Numeric variables
    /// that do not parse are a configuration error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let config = Self {
            project: var(ENV_PROJECT),
            credentials_file: var(ENV_CREDENTIALS).map(PathBuf::from),
            token: None,
            api_root: None,
            emulator_host: var(ENV_EMULATOR_HOST),
            session_timeout: parse_var(&var, ENV_TIMEOUT_SECS)?
                .map(RequestTimeout::secs)
                .unwrap_or(defaults.session_timeout),
            publish_timeout: parse_var(&var, ENV_PUBLISH_TIMEOUT_SECS)?
                .map(RequestTimeout::secs)
                .unwrap_or(defaults.publish_timeout),
            retry: RetryConfig {
                max_attempts: parse_var(&var, ENV_RETRY_MAX_ATTEMPTS)?
                    .unwrap_or(defaults.retry.max_attempts),
                initial_delay_secs: parse_var(&var, ENV_RETRY_INITIAL_DELAY_SECS)?
                    .unwrap_or(defaults.retry.initial_delay_secs),
                max_delay_secs: parse_var(&var, ENV_RETRY_MAX_DELAY_SECS)?
                    .unwrap_or(defaults.retry.max_delay_secs),
                jitter: parse_var(&var, ENV_RETRY_JITTER)?.unwrap_or(defaults.retry.jitter),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_file = Some(path.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = Some(api_root.into());
        self
    }

    pub fn with_emulator_host(mut self, host: impl Into<String>) -> Self {
        self.emulator_host = Some(host.into());
        self
    }

    pub fn with_session_timeout(mut self, timeout: RequestTimeout) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: RequestTimeout) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// The REST root requests are sent to, without a trailing slash.
    pub fn resolved_api_root(&self) -> String {
        let root = match (&self.api_root, &self.emulator_host) {
            (Some(root), _) => root.clone(),
            (None, Some(host)) => format!("http://{host}/v1"),
            (None, None) => DEFAULT_API_ROOT.to_string(),
        };
        root.trim_end_matches('/').to_string()
    }

    /// Whether requests target an emulator and should skip authentication.
    pub fn uses_emulator(&self) -> bool {
        self.api_root.is_none() && self.emulator_host.is_some()
    }
}

fn parse_var<T, F>(var: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            PubSubError::Config(format!("{key} has an invalid value: {raw:?}"))
        }),
    }
}
