//! # Progress Store
//!
//! Durable, checkpointed ledger of per-song outcomes.
//!
//! ## Overview
//!
//! The store owns three things:
//!
//! - one [`ProgressRecord`] per attempted song, keyed by content hash
//! - the set of content hashes already present in the target account
//!   (replaced at the start of each run, only grown while the run copies)
//! - the run counters reported by [`ProgressStore::summary`]
//!
//! It is the single source of truth for resuming. The coordinator is its only
//! writer; nothing else mutates it while a run is in progress.
//!
//! ## Atomicity
//!
//! [`ProgressStore::checkpoint`] writes the full state to a temporary file in
//! the same directory, syncs it, and renames it over the previous file. A
//! process killed mid-write leaves the previous file untouched.
//!
//! ## File Format
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "last_updated": "2024-05-01T12:00:00Z",
//!   "source_account": "main",
//!   "target_account": "backup",
//!   "statistics": { "total_source": 245, "already_in_target": 98, ... },
//!   "records": { "<content_hash>": { "status": "copied", ... } },
//!   "target_existing_hashes": ["<content_hash>", ...]
//! }
//! ```

use crate::record::{CopyStatus, ProgressRecord};
use crate::retry::ErrorKind;
use crate::{Result, SyncError};
use bridge_traits::{Association, Clock, CloudSong};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Format version written into every progress file
pub const PROGRESS_FORMAT_VERSION: &str = "1.0";

/// Aggregate counters for a migration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCounters {
    /// Songs listed in the source account at the start of the last run
    pub total_source: u64,
    /// Source entries whose hash the target held at the start of the last run
    pub already_in_target: u64,
    pub copied: u64,
    /// Songs skipped because the server lacks the content
    pub skipped: u64,
    pub failed: u64,
    /// Songs of the last run's remaining set not yet in a terminal status
    pub remaining: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProgressFile {
    version: String,
    last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    source_account: Option<String>,
    #[serde(default)]
    target_account: Option<String>,
    #[serde(default)]
    statistics: ProgressCounters,
    #[serde(default)]
    records: BTreeMap<String, ProgressRecord>,
    #[serde(default)]
    target_existing_hashes: BTreeSet<String>,
}

impl Default for ProgressFile {
    fn default() -> Self {
        Self {
            version: PROGRESS_FORMAT_VERSION.to_string(),
            last_updated: None,
            source_account: None,
            target_account: None,
            statistics: ProgressCounters::default(),
            records: BTreeMap::new(),
            target_existing_hashes: BTreeSet::new(),
        }
    }
}

/// Checkpointed progress of a migration
pub struct ProgressStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    state: ProgressFile,
}

impl ProgressStore {
    /// Load the store from `path`, or start empty if the file does not exist.
    ///
    /// A file that exists but cannot be parsed is moved aside to
    /// `<file>.backup` and an empty store is returned.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ProgressIo`] if the file cannot be read or the
    /// corrupt file cannot be moved aside.
    pub fn load(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.into();

        let state = match read_progress_file(&path)? {
            None => {
                info!(path = %path.display(), "No progress file found, starting fresh");
                ProgressFile::default()
            }
            Some(Ok(state)) => {
                if state.version != PROGRESS_FORMAT_VERSION {
                    warn!(
                        version = %state.version,
                        expected = PROGRESS_FORMAT_VERSION,
                        "Progress file has an unexpected version, loading anyway"
                    );
                }
                info!(
                    path = %path.display(),
                    records = state.records.len(),
                    "Loaded progress file"
                );
                state
            }
            Some(Err(parse_error)) => {
                let backup = backup_path(&path);
                std::fs::rename(&path, &backup).map_err(|source| SyncError::ProgressIo {
                    path: path.clone(),
                    source,
                })?;
                warn!(
                    error = %parse_error,
                    backup = %backup.display(),
                    "Progress file is corrupt, moved it aside and starting fresh"
                );
                ProgressFile::default()
            }
        };

        Ok(Self { path, clock, state })
    }

    /// Read a progress file without modifying anything on disk.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn inspect(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Option<Self>> {
        let path = path.into();

        match read_progress_file(&path)? {
            None => Ok(None),
            Some(Ok(state)) => Ok(Some(Self { path, clock, state })),
            Some(Err(e)) => Err(SyncError::Progress(format!(
                "{} is not a valid progress file: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, content_hash: &str) -> Option<&ProgressRecord> {
        self.state.records.get(content_hash)
    }

    pub fn records(&self) -> impl Iterator<Item = &ProgressRecord> {
        self.state.records.values()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.state.last_updated
    }

    pub fn source_account(&self) -> Option<&str> {
        self.state.source_account.as_deref()
    }

    pub fn target_account(&self) -> Option<&str> {
        self.state.target_account.as_deref()
    }

    /// Hashes known to be present in the target account.
    pub fn target_hashes(&self) -> &BTreeSet<String> {
        &self.state.target_existing_hashes
    }

    /// Whether the song's record is in a terminal status.
    pub fn is_terminal(&self, content_hash: &str) -> bool {
        self.get(content_hash)
            .map(|r| r.status.is_terminal())
            .unwrap_or(false)
    }

    /// Source songs minus songs with a terminal record, in source order.
    pub fn remaining<'a>(&self, source: &'a [CloudSong]) -> Vec<&'a CloudSong> {
        source
            .iter()
            .filter(|song| !self.is_terminal(&song.content_hash))
            .collect()
    }

    /// Record the display names of both accounts.
    pub fn set_accounts(&mut self, source: Option<&str>, target: Option<&str>) {
        self.state.source_account = source.map(String::from);
        self.state.target_account = target.map(String::from);
    }

    /// Replace the target hash set with a fresh listing.
    ///
    /// Hashes of songs recorded as copied stay in the set even when the
    /// listing does not show them yet.
    pub fn refresh_target<I>(&mut self, hashes: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut fresh: BTreeSet<String> = hashes.into_iter().collect();
        fresh.extend(
            self.state
                .records
                .values()
                .filter(|r| r.status == CopyStatus::Copied)
                .map(|r| r.content_hash.clone()),
        );
        self.state.target_existing_hashes = fresh;
    }

    /// Reset the run counters at the start of a run.
    pub fn begin_run(&mut self, total_source: u64, already_in_target: u64, remaining: u64) {
        self.state.statistics.total_source = total_source;
        self.state.statistics.already_in_target = already_in_target;
        self.state.statistics.remaining = remaining;
    }

    /// Start tracking a song, keeping any existing record.
    pub fn track(&mut self, song: &CloudSong) -> &ProgressRecord {
        let now = self.clock.now();
        let record = self
            .state
            .records
            .entry(song.content_hash.clone())
            .or_insert_with(|| ProgressRecord::new(song, now));

        record.title = song.title.clone();
        record.artist = song.artist.clone();
        record
    }

    /// Move a tracked song to `status`.
    ///
    /// Reaching `copied` adds the hash to the target set. Reaching any terminal
    /// status counts the song off the remaining counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the song is not tracked or the transition is invalid.
    pub fn record(
        &mut self,
        content_hash: &str,
        status: CopyStatus,
        error_kind: Option<ErrorKind>,
    ) -> Result<()> {
        let now = self.clock.now();
        let record = self.record_mut(content_hash)?;

        record.transition(status, now)?;
        if error_kind.is_some() {
            record.last_error_kind = error_kind;
        }

        if status == CopyStatus::Copied {
            self.state
                .target_existing_hashes
                .insert(content_hash.to_string());
        }

        if status.is_terminal() {
            let stats = &mut self.state.statistics;
            stats.remaining = stats.remaining.saturating_sub(1);
        }

        debug!(content_hash, status = %status, "Recorded song status");
        Ok(())
    }

    /// Add service calls to a song's attempt counter.
    pub fn add_attempts(&mut self, content_hash: &str, attempts: u32) -> Result<()> {
        let record = self.record_mut(content_hash)?;
        record.attempt_count = record.attempt_count.saturating_add(attempts);
        Ok(())
    }

    /// Remember the last error seen for a song without changing its status.
    pub fn note_error(
        &mut self,
        content_hash: &str,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Result<()> {
        let now = self.clock.now();
        let record = self.record_mut(content_hash)?;
        record.last_error_kind = Some(kind);
        record.last_error = Some(message.into());
        record.updated_at = now;
        Ok(())
    }

    /// Keep the association so a later run can resume at `publish`.
    pub fn stash_association(
        &mut self,
        content_hash: &str,
        association: Association,
    ) -> Result<()> {
        let record = self.record_mut(content_hash)?;
        record.association = Some(association);
        Ok(())
    }

    /// Counters for the last run, with outcomes counted from the records.
    pub fn summary(&self) -> ProgressCounters {
        let mut counters = self.state.statistics;
        counters.copied = 0;
        counters.skipped = 0;
        counters.failed = 0;

        for record in self.state.records.values() {
            match record.status {
                CopyStatus::Copied => counters.copied += 1,
                CopyStatus::SkippedNeedsUpload => counters.skipped += 1,
                CopyStatus::Failed => counters.failed += 1,
                _ => {}
            }
        }

        counters
    }

    /// Atomically persist the full state.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ProgressIo`] if any step of the write fails; the
    /// previous file is left intact in that case.
    pub fn checkpoint(&mut self) -> Result<()> {
        self.state.last_updated = Some(self.clock.now());
        self.state.statistics = self.summary();

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|source| self.io_error(source))?;

        let mut temp = NamedTempFile::new_in(&dir).map_err(|source| self.io_error(source))?;

        let json = serde_json::to_vec_pretty(&self.state)
            .map_err(|e| SyncError::Progress(format!("Failed to serialize progress: {}", e)))?;
        temp.write_all(&json)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|source| self.io_error(source))?;

        temp.persist(&self.path)
            .map_err(|e| self.io_error(e.error))?;

        debug!(
            path = %self.path.display(),
            records = self.state.records.len(),
            "Progress checkpointed"
        );
        Ok(())
    }

    fn record_mut(&mut self, content_hash: &str) -> Result<&mut ProgressRecord> {
        self.state
            .records
            .get_mut(content_hash)
            .ok_or_else(|| SyncError::Progress(format!("Song {} is not tracked", content_hash)))
    }

    fn io_error(&self, source: std::io::Error) -> SyncError {
        SyncError::ProgressIo {
            path: self.path.clone(),
            source,
        }
    }
}

impl std::fmt::Debug for ProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStore")
            .field("path", &self.path)
            .field("records", &self.state.records.len())
            .field("target_hashes", &self.state.target_existing_hashes.len())
            .finish()
    }
}

/// `Ok(None)` if missing, `Ok(Some(Err(..)))` if present but unparseable.
fn read_progress_file(
    path: &Path,
) -> Result<Option<std::result::Result<ProgressFile, serde_json::Error>>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SyncError::ProgressIo {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    Ok(Some(serde_json::from_slice(&bytes)))
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("progress"));
    name.push(".backup");
    path.with_file_name(name)
}
