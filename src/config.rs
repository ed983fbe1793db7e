use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::crawl::fetcher::RetryPolicy;
use crate::crawl::watermark::{parse_timestamp, Watermark};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as timestamp: {value}")]
    ParseTimestamp { name: String, value: String },
}

/// Outbound mail settings. Mail is disabled when this is absent.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub to: String,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Crawl target
    pub site_url: String,
    pub crawl_user: String,
    pub crawl_start_time: Option<DateTime<Local>>,

    // Storage
    pub data_dir: PathBuf,

    // Polling cadence
    pub poll_short_interval: Duration,
    pub poll_long_interval: Duration,
    pub max_no_new_before_backoff: u32,

    // Fetching
    pub fetch_max_attempts: u32,
    pub fetch_retry_delay: Duration,
    pub request_delay: Duration,
    pub http_timeout: Duration,

    // Web Server
    pub web_host: String,
    pub web_port: u16,

    // Mail
    pub smtp: Option<SmtpConfig>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let crawl_start_time = match optional_env("CRAWL_START_TIME") {
            Some(raw) => Some(parse_timestamp(&raw).ok_or_else(|| {
                ConfigError::ParseTimestamp {
                    name: "CRAWL_START_TIME".to_string(),
                    value: raw.clone(),
                }
            })?),
            None => None,
        };

        Ok(Self {
            // Crawl target
            site_url: required_env("SITE_URL")?,
            crawl_user: required_env("CRAWL_USER")?,
            crawl_start_time,

            // Storage
            data_dir: PathBuf::from(env_or_default("DATA_DIR", "./data")),

            // Polling cadence
            poll_short_interval: Duration::from_secs(parse_env_u64(
                "POLL_SHORT_INTERVAL_SECS",
                600,
            )?),
            poll_long_interval: Duration::from_secs(parse_env_u64(
                "POLL_LONG_INTERVAL_SECS",
                1800,
            )?),
            max_no_new_before_backoff: parse_env_u32("MAX_NO_NEW_BEFORE_BACKOFF", 3)?,

            // Fetching
            fetch_max_attempts: parse_env_u32("FETCH_MAX_ATTEMPTS", 5)?,
            fetch_retry_delay: Duration::from_millis(parse_env_u64("FETCH_RETRY_DELAY_MS", 1000)?),
            request_delay: Duration::from_millis(parse_env_u64("REQUEST_DELAY_MS", 1000)?),
            http_timeout: Duration::from_secs(parse_env_u64("HTTP_TIMEOUT_SECS", 30)?),

            // Web Server
            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("WEB_PORT", 8090)?,

            // Mail
            smtp: smtp_from_env()?,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.site_url.is_empty() {
            return Err(invalid("SITE_URL", "cannot be empty"));
        }
        if url::Url::parse(&self.site_url).is_err() {
            return Err(invalid("SITE_URL", "must be an absolute URL"));
        }
        if self.crawl_user.is_empty() {
            return Err(invalid("CRAWL_USER", "cannot be empty"));
        }
        if self.fetch_max_attempts == 0 {
            return Err(invalid("FETCH_MAX_ATTEMPTS", "must be at least 1"));
        }
        if self.max_no_new_before_backoff == 0 {
            return Err(invalid("MAX_NO_NEW_BEFORE_BACKOFF", "must be at least 1"));
        }
        if self.poll_short_interval.is_zero() {
            return Err(invalid("POLL_SHORT_INTERVAL_SECS", "must be at least 1"));
        }
        if self.poll_long_interval < self.poll_short_interval {
            return Err(invalid(
                "POLL_LONG_INTERVAL_SECS",
                "must not be shorter than POLL_SHORT_INTERVAL_SECS",
            ));
        }
        Ok(())
    }

    /// Directory holding this crawl target's day buckets and watermark.
    #[must_use]
    pub fn user_dir(&self) -> PathBuf {
        self.data_dir.join(&self.crawl_user)
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch_max_attempts,
            delay: self.fetch_retry_delay,
        }
    }

    /// Watermark used when nothing has been persisted yet.
    #[must_use]
    pub fn fallback_watermark(&self) -> Watermark {
        self.crawl_start_time
            .map_or_else(Watermark::epoch, Watermark::new)
    }

    /// A valid configuration with no delays, for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            site_url: "http://127.0.0.1/group/topics".to_string(),
            crawl_user: "tester".to_string(),
            crawl_start_time: None,
            data_dir: std::env::temp_dir().join("forum-reply-watcher-test"),
            poll_short_interval: Duration::from_secs(600),
            poll_long_interval: Duration::from_secs(1800),
            max_no_new_before_backoff: 3,
            fetch_max_attempts: 5,
            fetch_retry_delay: Duration::ZERO,
            request_delay: Duration::ZERO,
            http_timeout: Duration::from_secs(10),
            web_host: "127.0.0.1".to_string(),
            web_port: 8090,
            smtp: None,
        }
    }
}

fn smtp_from_env() -> Result<Option<SmtpConfig>, ConfigError> {
    let Some(host) = optional_env("SMTP_HOST") else {
        return Ok(None);
    };

    Ok(Some(SmtpConfig {
        host,
        port: parse_env_u16("SMTP_PORT", 25)?,
        user: optional_env("SMTP_USER"),
        password: optional_env("SMTP_PASSWORD"),
        to: required_env("EMAIL_TO")?,
    }))
}

fn invalid(name: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.to_string(),
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    optional_env(name).ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}
