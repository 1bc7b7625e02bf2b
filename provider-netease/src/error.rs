//! Error types for the NetEase provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Service code the API returns when the cookie is no longer accepted
pub const CODE_NEEDS_LOGIN: i64 = 301;

/// NetEase provider errors
#[derive(Error, Debug)]
pub enum NeteaseError {
    /// Cookie missing, expired or rejected
    #[error("Session rejected: {0}")]
    SessionExpired(String),

    /// Non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Service-level rejection carried in the response body
    #[error("NetEase API error (code {code}): {message}")]
    Service { code: i64, message: String },

    /// Response body could not be decoded
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for NetEase operations
pub type Result<T> = std::result::Result<T, NeteaseError>;

/// Human-readable description of a common service or HTTP code
pub fn describe_code(code: i64) -> Option<&'static str> {
    match code {
        401 => Some("unauthorized, the cookie may have expired"),
        403 => Some("forbidden, the account lacks permission"),
        429 => Some("too many requests"),
        500 => Some("internal server error"),
        502 => Some("bad gateway"),
        503 => Some("service unavailable"),
        523 => Some("origin unreachable, usually a transient routing issue"),
        _ => None,
    }
}

impl From<NeteaseError> for BridgeError {
    fn from(error: NeteaseError) -> Self {
        match error {
            NeteaseError::SessionExpired(msg) => BridgeError::Unauthorized(msg),
            NeteaseError::Http { status, message } => {
                if status == 429 || (500..600).contains(&status) {
                    BridgeError::Network(format!("HTTP {}: {}", status, message))
                } else {
                    BridgeError::Rejected {
                        code: i64::from(status),
                        message,
                    }
                }
            }
            NeteaseError::Service { code, message } => BridgeError::Rejected { code, message },
            NeteaseError::ParseError(msg) => {
                BridgeError::OperationFailed(format!("Parse error: {}", msg))
            }
            NeteaseError::BridgeError(e) => e,
        }
    }
}
