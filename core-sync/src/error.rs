use bridge_traits::BridgeError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Session for the {account} account was rejected; refresh its cookie")]
    SessionInvalid { account: String },

    #[error("Authentication failed for the {account} account: {message}")]
    Authentication { account: String, message: String },

    #[error("Failed to list the {account} account's cloud drive: {source}")]
    Listing {
        account: String,
        #[source]
        source: BridgeError,
    },

    #[error("Service error: {0}")]
    Service(#[from] BridgeError),

    #[error("Invalid copy status: {0}")]
    InvalidStatus(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Progress store error: {0}")]
    Progress(String),

    #[error("Progress file I/O failed for {}: {source}", path.display())]
    ProgressIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid copy configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether the error stems from a rejected credential
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            SyncError::SessionInvalid { .. } | SyncError::Authentication { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
