//! # Configuration Module
//!
//! Provides the validated configuration for a copy run.
//!
//! ## Overview
//!
//! Two kinds of configuration exist:
//!
//! - [`AppConfig`] holds the typed run options (file locations, batch size,
//!   logging, retry and rate limits). It is constructed through
//!   [`AppConfigBuilder`] and validated once, at `build()` time.
//! - [`CookieConfig`] is the JSON file holding the two account credentials.
//!   The cookies are opaque blobs handed to [`AccountSession`] unchanged.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{AppConfig, CookieConfig};
//!
//! let config = AppConfig::builder()
//!     .config_path("config/cookies.json")
//!     .progress_path("data/progress.json")
//!     .batch_size(10)
//!     .build()?;
//!
//! let cookies = CookieConfig::load(&config.config_path)?;
//! let source = cookies.session(AccountRole::Source);
//! ```
//!
//! ## Error Handling
//!
//! Invalid option values produce [`Error::Config`] with an actionable message.
//! The cookie file distinguishes a missing file, an unreadable file, malformed
//! JSON and an empty cookie, so the CLI can tell the user exactly what to fix.

use crate::error::{Error, Result};
use crate::logging::{redact_if_sensitive, LogFormat};
use bridge_traits::{AccountRole, AccountSession, LogLevel};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/cookies.json";
pub const DEFAULT_PROGRESS_PATH: &str = "data/progress.json";
pub const DEFAULT_LOG_FILE: &str = "netease_copy.log";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 2.0;

/// Run options for a copy.
///
/// Use [`AppConfig::builder`] to construct instances; fields are public for
/// reading only after validation has passed.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Path to the JSON file holding both account cookies
    pub config_path: PathBuf,

    /// Path to the progress file
    pub progress_path: PathBuf,

    /// Number of songs processed between checkpoints
    pub batch_size: usize,

    /// Minimum console log level
    pub log_level: LogLevel,

    /// Console log format
    pub log_format: LogFormat,

    /// Optional debug-level log file
    pub log_file: Option<PathBuf>,

    /// Attempts per protocol step before a song is marked failed
    pub retry_attempts: u32,

    /// Delay before the first retry
    pub retry_base_delay: Duration,

    /// Upper bound on any retry delay
    pub retry_max_delay: Duration,

    /// Client-side limit on calls to the service
    pub requests_per_second: f64,

    /// Timeout applied to every HTTP request
    pub request_timeout: Duration,
}

impl AppConfig {
    /// Creates a new builder populated with defaults.
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Validates option values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending option.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config(
                "batch_size must be at least 1 (use 1 to checkpoint after every song)".to_string(),
            ));
        }

        if self.retry_attempts == 0 {
            return Err(Error::Config(
                "retry_attempts must be at least 1".to_string(),
            ));
        }

        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(Error::Config(format!(
                "requests_per_second must be a positive number, got {}",
                self.requests_per_second
            )));
        }

        if self.retry_base_delay > self.retry_max_delay {
            return Err(Error::Config(format!(
                "retry_base_delay ({:?}) cannot exceed retry_max_delay ({:?})",
                self.retry_base_delay, self.retry_max_delay
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "request_timeout must be greater than zero".to_string(),
            ));
        }

        if self.progress_path.as_os_str().is_empty() {
            return Err(Error::Config("progress_path cannot be empty".to_string()));
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            progress_path: PathBuf::from(DEFAULT_PROGRESS_PATH),
            batch_size: DEFAULT_BATCH_SIZE,
            log_level: LogLevel::Info,
            log_format: LogFormat::default(),
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(10),
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Builder for [`AppConfig`].
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    pub fn config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.config_path = path.into();
        self
    }

    pub fn progress_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.progress_path = path.into();
        self
    }

    /// Sets the checkpoint interval in songs.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log_level = level;
        self
    }

    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log_format = format;
        self
    }

    /// Sets the log file path, or disables the file with `None`.
    pub fn log_file<P: Into<PathBuf>>(mut self, path: Option<P>) -> Self {
        self.config.log_file = path.map(Into::into);
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.config.retry_attempts = attempts;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.config.retry_max_delay = delay;
        self
    }

    pub fn requests_per_second(mut self, rate: f64) -> Self {
        self.config.requests_per_second = rate;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any option is out of range.
    pub fn build(self) -> Result<AppConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Credentials for one account as stored in the cookie file.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct AccountConfig {
    #[serde(default)]
    pub cookie: String,

    #[serde(default)]
    pub account_name: Option<String>,
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("cookie", &redact_if_sensitive("cookie", &self.cookie))
            .field("account_name", &self.account_name)
            .finish()
    }
}

/// The JSON cookie file: `{"source": {...}, "target": {...}}`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CookieConfig {
    pub source: AccountConfig,
    pub target: AccountConfig,
}

impl CookieConfig {
    /// Loads and validates the cookie file.
    ///
    /// # Errors
    ///
    /// - [`Error::ConfigNotFound`] if the file does not exist
    /// - [`Error::ConfigUnreadable`] if it cannot be read
    /// - [`Error::ConfigMalformed`] if it is not the expected JSON shape
    /// - [`Error::MissingCookie`] if either cookie is blank
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(Error::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|source| Error::ConfigUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

        let config: CookieConfig =
            serde_json::from_str(&raw).map_err(|source| Error::ConfigMalformed {
                path: path.to_path_buf(),
                source,
            })?;

        for (role, account) in [
            (AccountRole::Source, &config.source),
            (AccountRole::Target, &config.target),
        ] {
            if account.cookie.trim().is_empty() {
                return Err(Error::MissingCookie {
                    account: role.to_string(),
                    path: path.to_path_buf(),
                });
            }
        }

        Ok(config)
    }

    /// Returns the account entry for a role.
    pub fn account(&self, role: AccountRole) -> &AccountConfig {
        match role {
            AccountRole::Source => &self.source,
            AccountRole::Target => &self.target,
        }
    }

    /// Builds the session handle for a role.
    pub fn session(&self, role: AccountRole) -> AccountSession {
        let account = self.account(role);
        AccountSession::new(role, account.cookie.trim())
            .with_account_name(account.account_name.clone())
    }
}
