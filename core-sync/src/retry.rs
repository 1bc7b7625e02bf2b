//! # Retry Policy
//!
//! Failure classification and bounded retry for service calls.
//!
//! ## Overview
//!
//! Every error coming back from the service is classified by [`classify`], a
//! pure function:
//!
//! - [`ErrorKind::Network`]: transport failures, throttling and server-side
//!   outages. Retried up to [`RetryPolicy::max_attempts`] with exponential
//!   backoff.
//! - [`ErrorKind::Permanent`]: malformed requests and rejections unrelated to
//!   load. Never retried.
//! - [`ErrorKind::Auth`]: the session was rejected. Never retried and fatal to
//!   the whole run.
//!
//! [`RetryPolicy::run`] drives one operation under the policy and reports how
//! many attempts it took, so callers can account for every call made.

use bridge_traits::BridgeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Maximum number of attempts for one protocol step
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Service rejection codes that indicate load or a temporary outage
const TRANSIENT_SERVICE_CODES: &[i64] = &[429, 503, 523];

/// Classification of a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient; worth retrying
    Network,
    /// Retrying will not help
    Permanent,
    /// Credential rejected; aborts the run
    Auth,
}

impl ErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Network)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::Auth)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Auth => "auth",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a service error.
pub fn classify(error: &BridgeError) -> ErrorKind {
    match error {
        BridgeError::Unauthorized(_) => ErrorKind::Auth,
        BridgeError::Network(_) | BridgeError::Io(_) => ErrorKind::Network,
        BridgeError::Rejected { code, .. } => {
            if TRANSIENT_SERVICE_CODES.contains(code) || (500..600).contains(code) {
                ErrorKind::Network
            } else {
                ErrorKind::Permanent
            }
        }
        BridgeError::OperationFailed(_) | BridgeError::NotAvailable(_) => ErrorKind::Permanent,
    }
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per operation, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// A failure that ended a retried operation
#[derive(Debug)]
pub struct RetryFailure {
    pub kind: ErrorKind,
    pub error: BridgeError,
}

/// Result of [`RetryPolicy::run`] together with the number of calls made
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, RetryFailure>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` failed with `kind`.
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        kind.is_transient() && attempt < self.max_attempts
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// bound is reached.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bridge_traits::error::Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match call().await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(error) => {
                    let kind = classify(&error);

                    if !self.should_retry(kind, attempt) {
                        return Attempted {
                            result: Err(RetryFailure { kind, error }),
                            attempts: attempt,
                        };
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
