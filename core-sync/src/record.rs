//! # Per-Song State Machine
//!
//! Status values and progress records for songs moving through the
//! association protocol.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Checking → Eligible → TokenAllocated → MetadataAssociated → Published → Copied
//!              │           │            │                  │
//!              ├→ SkippedNeedsUpload    │                  │
//!              └───────────┴────────────┴──────────────────┴→ Failed
//! ```
//!
//! `Copied`, `SkippedNeedsUpload` and `Failed` are terminal: a record in one of
//! them is never revisited. Any other status may restart at `Checking` when a
//! later run picks the song up again.

use crate::retry::ErrorKind;
use crate::{Result, SyncError};
use bridge_traits::{Association, CloudSong};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Where a song stands in the association protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStatus {
    /// Tracked but not yet attempted
    Pending,
    /// Asking the server whether the content exists
    Checking,
    /// Server holds the content; association can proceed
    Eligible,
    /// Placement token allocated
    TokenAllocated,
    /// Metadata associated; awaiting publish
    MetadataAssociated,
    /// Publish acknowledged
    Published,
    /// Association visible in the target account
    Copied,
    /// Server lacks the bytes; uploading is out of scope
    SkippedNeedsUpload,
    /// Permanent error or retry bound exceeded
    Failed,
}

impl CopyStatus {
    /// Check if this status will never be revisited
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CopyStatus::Copied | CopyStatus::SkippedNeedsUpload | CopyStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CopyStatus::Pending => "pending",
            CopyStatus::Checking => "checking",
            CopyStatus::Eligible => "eligible",
            CopyStatus::TokenAllocated => "token_allocated",
            CopyStatus::MetadataAssociated => "metadata_associated",
            CopyStatus::Published => "published",
            CopyStatus::Copied => "copied",
            CopyStatus::SkippedNeedsUpload => "skipped_needs_upload",
            CopyStatus::Failed => "failed",
        }
    }
}

impl FromStr for CopyStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(CopyStatus::Pending),
            "checking" => Ok(CopyStatus::Checking),
            "eligible" => Ok(CopyStatus::Eligible),
            "token_allocated" => Ok(CopyStatus::TokenAllocated),
            "metadata_associated" => Ok(CopyStatus::MetadataAssociated),
            "published" => Ok(CopyStatus::Published),
            "copied" => Ok(CopyStatus::Copied),
            "skipped_needs_upload" => Ok(CopyStatus::SkippedNeedsUpload),
            "failed" => Ok(CopyStatus::Failed),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validate a status transition
///
/// # Errors
///
/// Returns [`SyncError::InvalidStateTransition`] when `to` is not reachable
/// from `from`.
pub fn validate_transition(from: CopyStatus, to: CopyStatus) -> Result<()> {
    use CopyStatus::*;

    let valid = match (from, to) {
        // Terminal states cannot transition
        (Copied, _) | (SkippedNeedsUpload, _) | (Failed, _) => false,

        // Any in-flight status restarts at the check
        (_, Checking) => true,

        (Checking, Eligible) => true,
        (Checking, SkippedNeedsUpload) => true,
        (Eligible, TokenAllocated) => true,
        (TokenAllocated, MetadataAssociated) => true,
        (MetadataAssociated, Published) => true,
        (Published, Copied) => true,

        (Checking | Eligible | TokenAllocated | MetadataAssociated, Failed) => true,

        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(SyncError::InvalidStateTransition {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
            reason: if from.is_terminal() {
                "Song already reached a terminal status".to_string()
            } else {
                "Transition skips a protocol step".to_string()
            },
        })
    }
}

/// One record per attempted song, keyed by content hash in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub content_hash: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    pub status: CopyStatus,
    /// Total service calls made for this song across all runs
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub last_error_kind: Option<ErrorKind>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Association to publish when resuming from `metadata_associated`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub association: Option<Association>,
}

impl ProgressRecord {
    /// Create a pending record for a song
    pub fn new(song: &CloudSong, now: DateTime<Utc>) -> Self {
        Self {
            content_hash: song.content_hash.clone(),
            title: song.title.clone(),
            artist: song.artist.clone(),
            status: CopyStatus::Pending,
            attempt_count: 0,
            last_error_kind: None,
            last_error: None,
            updated_at: now,
            association: None,
        }
    }

    /// Move to `to`, validating the transition
    ///
    /// # Errors
    ///
    /// Returns an error if the transition is not allowed.
    pub fn transition(&mut self, to: CopyStatus, now: DateTime<Utc>) -> Result<()> {
        validate_transition(self.status, to)?;

        if to == CopyStatus::Checking || to.is_terminal() {
            self.association = None;
        }

        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Whether a later run can skip straight to `publish`
    pub fn can_resume_publish(&self) -> bool {
        self.status == CopyStatus::MetadataAssociated && self.association.is_some()
    }
}
