//! Cloud Music Service Abstraction
//!
//! Capability trait for a music service that keeps per-account "cloud drive"
//! song lists and can associate already-stored audio content with an account
//! by content hash.
//!
//! The association protocol is a chain of four calls:
//!
//! ```text
//! check_needs_upload → allocate_token → associate_metadata → publish
//! ```
//!
//! Each call is scoped to an [`AccountSession`]. Failures are reported through
//! [`BridgeError`](crate::error::BridgeError) variants so callers can classify
//! them (`Unauthorized`, `Network`, `Rejected`, ...).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Which side of a migration an account is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    Source,
    Target,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Source => "source",
            AccountRole::Target => "target",
        }
    }
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated handle for one account
///
/// The cookie is an opaque credential blob; it is passed through to the
/// service unchanged and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountSession {
    role: AccountRole,
    account_name: Option<String>,
    cookie: String,
}

impl AccountSession {
    pub fn new(role: AccountRole, cookie: impl Into<String>) -> Self {
        Self {
            role,
            account_name: None,
            cookie: cookie.into(),
        }
    }

    pub fn with_account_name(mut self, name: Option<String>) -> Self {
        self.account_name = name.filter(|n| !n.trim().is_empty());
        self
    }

    pub fn role(&self) -> AccountRole {
        self.role
    }

    pub fn account_name(&self) -> Option<&str> {
        self.account_name.as_deref()
    }

    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    /// Display label: the configured account name, or the role
    pub fn label(&self) -> &str {
        self.account_name().unwrap_or_else(|| self.role.as_str())
    }
}

impl fmt::Debug for AccountSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSession")
            .field("role", &self.role)
            .field("account_name", &self.account_name)
            .field("cookie", &"[REDACTED]")
            .finish()
    }
}

/// A song in an account's cloud drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudSong {
    /// Server-computed hash of the audio bytes; the identity used for dedup
    pub content_hash: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub file_name: String,
    /// File size in bytes
    pub size: u64,
    pub bitrate: u32,
    /// Server-side song id, when the listing reports one
    pub server_song_id: Option<i64>,
    /// Whether the server lacks the bytes, when the listing reports it
    pub needs_upload: Option<bool>,
}

impl CloudSong {
    /// File extension used for token allocation, defaulting to `flac`
    pub fn extension(&self) -> &str {
        match self.file_name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => ext,
            _ => "flac",
        }
    }
}

/// Result of asking the server whether content must be uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCheck {
    pub needs_upload: bool,
    /// Server song id to reference in the association call
    pub server_song_id: String,
}

/// Placement allocated on the server for already-stored content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementToken {
    pub content_hash: String,
    pub resource_id: i64,
    pub server_song_id: String,
}

/// Metadata association awaiting publication
///
/// Persisted with progress records so a run interrupted after association can
/// resume at `publish`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub content_hash: String,
    pub cloud_song_id: i64,
}

/// Cloud music service capability
///
/// # Errors
///
/// Implementations report:
/// - `BridgeError::Unauthorized` when the session is not accepted
/// - `BridgeError::Network` for transport failures and throttling
/// - `BridgeError::Rejected` for service-level rejections with a code
/// - `BridgeError::OperationFailed` for malformed responses
#[async_trait]
pub trait CloudMusicService: Send + Sync {
    /// List every song in the account's cloud drive (paginated internally)
    async fn list_cloud_songs(&self, session: &AccountSession) -> Result<Vec<CloudSong>>;

    /// Ask whether the content behind `song.content_hash` must be uploaded
    async fn check_needs_upload(
        &self,
        session: &AccountSession,
        song: &CloudSong,
    ) -> Result<UploadCheck>;

    /// Allocate a placement token for content the server already holds
    async fn allocate_token(
        &self,
        session: &AccountSession,
        song: &CloudSong,
        check: &UploadCheck,
    ) -> Result<PlacementToken>;

    /// Associate song metadata with the allocated placement
    async fn associate_metadata(
        &self,
        session: &AccountSession,
        token: &PlacementToken,
        song: &CloudSong,
    ) -> Result<Association>;

    /// Publish the association into the account's cloud drive
    async fn publish(&self, session: &AccountSession, association: &Association) -> Result<()>;

    /// Check whether the session is accepted by the service
    async fn validate_session(&self, session: &AccountSession) -> Result<bool>;
}
