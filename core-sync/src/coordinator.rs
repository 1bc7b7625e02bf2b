//! # Copy Coordinator
//!
//! Drives a resumable copy of cloud-drive associations from a source account
//! to a target account.
//!
//! ## Overview
//!
//! The `CopyCoordinator` is the only writer of the [`ProgressStore`]. One call
//! to [`CopyCoordinator::run`]:
//!
//! 1. Validates both sessions (an invalid session aborts the run)
//! 2. Lists the source and target cloud drives
//! 3. Computes the remaining set: source songs without a terminal record whose
//!    hash the target lacks, one per hash
//! 4. Drives each remaining song through the association protocol, in order
//! 5. Checkpoints every `batch_size` songs, on cancellation, on abort and at
//!    the end
//!
//! ## Per-song protocol
//!
//! ```text
//! check_needs_upload → allocate_token → associate_metadata → publish
//! ```
//!
//! Every call runs under the [`RetryPolicy`]. Transient failures are retried up
//! to the bound, permanent failures mark the song `failed` immediately, and an
//! authentication failure aborts the run after checkpointing.
//!
//! A song whose metadata association succeeded keeps the association in its
//! record. If `publish` then runs out of transient retries the song stays
//! `metadata_associated`, and the next run resumes at `publish` instead of
//! associating a second time. Every other in-flight status restarts at the
//! check.
//!
//! ## Cancellation
//!
//! The cancellation token is observed before each song starts. A song already
//! in flight runs to the end of its protocol, so cancellation never leaves a
//! half-recorded step behind.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{CopyConfig, CopyCoordinator, ProgressStore};
//!
//! let coordinator = CopyCoordinator::new(service, source, target, CopyConfig::default())
//!     .with_event_bus(event_bus.clone());
//! let token = coordinator.cancellation_token();
//!
//! let mut store = ProgressStore::load("data/progress.json", Arc::new(SystemClock))?;
//! let report = coordinator.run(&mut store).await?;
//! println!("{:?}: {} copied", report.outcome, report.summary.copied);
//! ```

use crate::{
    dedup,
    progress::{ProgressCounters, ProgressStore},
    record::CopyStatus,
    retry::{ErrorKind, RetryFailure, RetryPolicy},
    Result, SyncError,
};
use bridge_traits::{AccountSession, Association, CloudMusicService, CloudSong};
use core_runtime::events::{CopyEvent, EventBus};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Default number of songs between checkpoints
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Copy engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyConfig {
    /// Songs processed between checkpoints; 1 checkpoints after every song.
    ///
    /// Outcomes reached since the last checkpoint live only in memory, so a
    /// hard crash can lose up to `batch_size - 1` of them. The next run finds
    /// the published ones in the target listing and redoes the rest.
    pub batch_size: usize,

    /// Retry policy applied to every service call
    pub retry: RetryPolicy,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl CopyConfig {
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for a zero batch size or attempt bound.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SyncError::Config("batch_size must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::Config(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every song in the remaining set was processed
    Completed,
    /// Stopped at a song boundary by the cancellation token
    Cancelled,
}

/// Result of a run that did not abort
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    /// Counters as persisted by the final checkpoint
    pub summary: ProgressCounters,
    /// Songs processed by this run
    pub processed: u64,
}

/// Where one song ended up in this run
#[derive(Debug)]
enum SongOutcome {
    Copied,
    SkippedNeedsUpload,
    Failed { message: String },
    /// Publish retries ran out; resumes at publish next run
    Deferred { message: String },
}

impl SongOutcome {
    fn status(&self) -> CopyStatus {
        match self {
            SongOutcome::Copied => CopyStatus::Copied,
            SongOutcome::SkippedNeedsUpload => CopyStatus::SkippedNeedsUpload,
            SongOutcome::Failed { .. } => CopyStatus::Failed,
            SongOutcome::Deferred { .. } => CopyStatus::MetadataAssociated,
        }
    }

    fn error(&self) -> Option<String> {
        match self {
            SongOutcome::Failed { message } | SongOutcome::Deferred { message } => {
                Some(message.clone())
            }
            _ => None,
        }
    }
}

/// Why a protocol step did not produce a value
enum StepError {
    /// Fatal to the whole run
    Abort(SyncError),
    /// Confined to the current song
    Song(RetryFailure),
}

impl From<SyncError> for StepError {
    fn from(error: SyncError) -> Self {
        StepError::Abort(error)
    }
}

/// Copy coordinator
pub struct CopyCoordinator {
    service: Arc<dyn CloudMusicService>,
    source: AccountSession,
    target: AccountSession,
    config: CopyConfig,
    event_bus: Option<EventBus>,
    cancellation_token: CancellationToken,
}

impl CopyCoordinator {
    pub fn new(
        service: Arc<dyn CloudMusicService>,
        source: AccountSession,
        target: AccountSession,
        config: CopyConfig,
    ) -> Self {
        Self {
            service,
            source,
            target,
            config,
            event_bus: None,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Publish progress events to `event_bus`.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Token that stops the run at the next song boundary when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Run the copy to completion or cancellation.
    ///
    /// The store is checkpointed on every exit path, including errors.
    ///
    /// # Errors
    ///
    /// - [`SyncError::SessionInvalid`] / [`SyncError::Authentication`] when an
    ///   account's credential is rejected
    /// - [`SyncError::Listing`] when a cloud drive cannot be listed
    /// - [`SyncError::ProgressIo`] when a checkpoint cannot be written
    pub async fn run(&self, store: &mut ProgressStore) -> Result<CopyReport> {
        let run_id = Uuid::new_v4();

        let result = self.execute(run_id, store).await;
        let checkpoint = store.checkpoint();

        let (outcome, processed) = match (result, checkpoint) {
            (Ok(done), Ok(())) => done,
            (Ok(_), Err(e)) => {
                self.emit_failed(run_id, &e);
                return Err(e);
            }
            (Err(e), checkpoint) => {
                if let Err(checkpoint_error) = checkpoint {
                    error!(
                        %run_id,
                        error = %checkpoint_error,
                        "Failed to save progress after aborted run"
                    );
                }
                self.emit_failed(run_id, &e);
                return Err(e);
            }
        };

        let summary = store.summary();
        info!(
            %run_id,
            outcome = ?outcome,
            processed,
            copied = summary.copied,
            skipped = summary.skipped,
            failed = summary.failed,
            remaining = summary.remaining,
            "Copy run finished"
        );

        self.emit(match outcome {
            RunOutcome::Completed => CopyEvent::Completed {
                run_id: run_id.to_string(),
                copied: summary.copied,
                skipped: summary.skipped,
                failed: summary.failed,
                remaining: summary.remaining,
            },
            RunOutcome::Cancelled => CopyEvent::Cancelled {
                run_id: run_id.to_string(),
                processed,
            },
        });

        Ok(CopyReport {
            run_id,
            outcome,
            summary,
            processed,
        })
    }

    #[instrument(skip_all, fields(run_id = %run_id))]
    async fn execute(&self, run_id: Uuid, store: &mut ProgressStore) -> Result<(RunOutcome, u64)> {
        self.config.validate()?;

        self.ensure_session(&self.source).await?;
        self.ensure_session(&self.target).await?;
        store.set_accounts(self.source.account_name(), self.target.account_name());

        let source_songs = self.list(&self.source).await?;
        info!(count = source_songs.len(), account = self.source.label(), "Listed source cloud drive");

        let target_hashes: HashSet<String> = self
            .list(&self.target)
            .await?
            .into_iter()
            .map(|song| song.content_hash)
            .collect();
        info!(count = target_hashes.len(), account = self.target.label(), "Listed target cloud drive");

        store.refresh_target(target_hashes.iter().cloned());

        let candidates = store.remaining(&source_songs);
        let remaining = dedup::deduplicate(candidates, &target_hashes);
        let already_in_target = dedup::count_in_target(&source_songs, &target_hashes, |hash| {
            store.get(hash).is_some()
        });
        let total = remaining.len() as u64;

        store.begin_run(source_songs.len() as u64, already_in_target as u64, total);
        info!(
            total_source = source_songs.len(),
            already_in_target,
            to_process = total,
            "Computed remaining set"
        );

        self.emit(CopyEvent::Started {
            run_id: run_id.to_string(),
            total_source: source_songs.len() as u64,
            already_in_target: already_in_target as u64,
            to_process: total,
        });

        let mut processed = 0u64;

        for song in remaining {
            if self.cancellation_token.is_cancelled() {
                info!(processed, "Cancellation requested, stopping before next song");
                return Ok((RunOutcome::Cancelled, processed));
            }

            let outcome = self.process_song(store, song).await?;
            processed += 1;

            self.emit(CopyEvent::SongFinished {
                run_id: run_id.to_string(),
                index: processed,
                total,
                content_hash: song.content_hash.clone(),
                title: song.title.clone(),
                artist: song.artist.clone(),
                status: outcome.status().to_string(),
                error: outcome.error(),
            });

            if processed % self.config.batch_size as u64 == 0 {
                store.checkpoint()?;
                debug!(processed, "Checkpoint after batch");
                self.emit(CopyEvent::Checkpointed {
                    run_id: run_id.to_string(),
                    processed,
                });
            }
        }

        Ok((RunOutcome::Completed, processed))
    }

    /// Drive one song through the protocol.
    ///
    /// Returns `Err` only for run-fatal conditions; everything else is
    /// recorded against the song.
    #[instrument(skip(self, store, song), fields(content_hash = %song.content_hash, title = %song.title))]
    async fn process_song(
        &self,
        store: &mut ProgressStore,
        song: &CloudSong,
    ) -> Result<SongOutcome> {
        let hash = song.content_hash.as_str();

        let record = store.track(song);
        let resume_at_publish = if record.can_resume_publish() {
            record.association.clone()
        } else {
            None
        };

        if let Some(association) = resume_at_publish {
            debug!("Resuming at publish with stored association");
            return self.publish_step(store, song, association).await;
        }

        store.record(hash, CopyStatus::Checking, None)?;

        if song.needs_upload == Some(true) {
            return self.skip_needs_upload(store, song);
        }

        let check = match self
            .step(store, song, "check_needs_upload", || {
                self.service.check_needs_upload(&self.target, song)
            })
            .await
        {
            Ok(check) => check,
            Err(e) => return self.settle(store, song, e),
        };

        if check.needs_upload {
            return self.skip_needs_upload(store, song);
        }
        store.record(hash, CopyStatus::Eligible, None)?;

        let token = match self
            .step(store, song, "allocate_token", || {
                self.service.allocate_token(&self.target, song, &check)
            })
            .await
        {
            Ok(token) => token,
            Err(e) => return self.settle(store, song, e),
        };
        debug!(resource_id = token.resource_id, "Allocated placement token");
        store.record(hash, CopyStatus::TokenAllocated, None)?;

        let association = match self
            .step(store, song, "associate_metadata", || {
                self.service.associate_metadata(&self.target, &token, song)
            })
            .await
        {
            Ok(association) => association,
            Err(e) => return self.settle(store, song, e),
        };
        debug!(cloud_song_id = association.cloud_song_id, "Associated metadata");
        store.stash_association(hash, association.clone())?;
        store.record(hash, CopyStatus::MetadataAssociated, None)?;

        self.publish_step(store, song, association).await
    }

    async fn publish_step(
        &self,
        store: &mut ProgressStore,
        song: &CloudSong,
        association: Association,
    ) -> Result<SongOutcome> {
        let hash = song.content_hash.as_str();

        match self
            .step(store, song, "publish", || {
                self.service.publish(&self.target, &association)
            })
            .await
        {
            Ok(()) => {
                store.record(hash, CopyStatus::Published, None)?;
                store.record(hash, CopyStatus::Copied, None)?;
                info!(artist = %song.artist, "Copied");
                Ok(SongOutcome::Copied)
            }
            Err(StepError::Song(failure)) if failure.kind.is_transient() => {
                warn!(
                    error = %failure.error,
                    "Publish retries exhausted, will resume at publish on the next run"
                );
                Ok(SongOutcome::Deferred {
                    message: format!("publish: {}", failure.error),
                })
            }
            Err(e) => self.settle(store, song, e),
        }
    }

    fn skip_needs_upload(&self, store: &mut ProgressStore, song: &CloudSong) -> Result<SongOutcome> {
        store.record(&song.content_hash, CopyStatus::SkippedNeedsUpload, None)?;
        info!(artist = %song.artist, "Server does not hold this content, skipping (needs upload)");
        Ok(SongOutcome::SkippedNeedsUpload)
    }

    /// Record a step failure against the song, or propagate a fatal one.
    fn settle(
        &self,
        store: &mut ProgressStore,
        song: &CloudSong,
        error: StepError,
    ) -> Result<SongOutcome> {
        match error {
            StepError::Abort(e) => Err(e),
            StepError::Song(failure) => {
                store.record(&song.content_hash, CopyStatus::Failed, Some(failure.kind))?;
                warn!(
                    kind = %failure.kind,
                    error = %failure.error,
                    "Song failed"
                );
                Ok(SongOutcome::Failed {
                    message: failure.error.to_string(),
                })
            }
        }
    }

    /// Run one protocol step under the retry policy and account for it.
    async fn step<T, F, Fut>(
        &self,
        store: &mut ProgressStore,
        song: &CloudSong,
        operation: &'static str,
        call: F,
    ) -> std::result::Result<T, StepError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bridge_traits::error::Result<T>>,
    {
        let hash = song.content_hash.as_str();
        let attempted = self.config.retry.run(operation, call).await;
        store.add_attempts(hash, attempted.attempts)?;

        match attempted.result {
            Ok(value) => Ok(value),
            Err(failure) => {
                store.note_error(
                    hash,
                    failure.kind,
                    format!("{}: {}", operation, failure.error),
                )?;

                if failure.kind == ErrorKind::Auth {
                    error!(
                        operation,
                        account = self.target.label(),
                        "Session rejected mid-run, aborting"
                    );
                    return Err(StepError::Abort(SyncError::Authentication {
                        account: self.target.label().to_string(),
                        message: failure.error.to_string(),
                    }));
                }

                Err(StepError::Song(failure))
            }
        }
    }

    async fn ensure_session(&self, session: &AccountSession) -> Result<()> {
        let attempted = self
            .config
            .retry
            .run("validate_session", || self.service.validate_session(session))
            .await;

        match attempted.result {
            Ok(true) => {
                debug!(account = session.label(), "Session valid");
                Ok(())
            }
            Ok(false) => Err(SyncError::SessionInvalid {
                account: session.label().to_string(),
            }),
            Err(failure) if failure.kind.is_fatal() => Err(SyncError::SessionInvalid {
                account: session.label().to_string(),
            }),
            Err(failure) => Err(SyncError::Service(failure.error)),
        }
    }

    async fn list(&self, session: &AccountSession) -> Result<Vec<CloudSong>> {
        let attempted = self
            .config
            .retry
            .run("list_cloud_songs", || self.service.list_cloud_songs(session))
            .await;

        match attempted.result {
            Ok(songs) => Ok(songs),
            Err(failure) if failure.kind.is_fatal() => Err(SyncError::Authentication {
                account: session.label().to_string(),
                message: failure.error.to_string(),
            }),
            Err(failure) => Err(SyncError::Listing {
                account: session.label().to_string(),
                source: failure.error,
            }),
        }
    }

    fn emit(&self, event: CopyEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event).ok();
        }
    }

    fn emit_failed(&self, run_id: Uuid, error: &SyncError) {
        error!(%run_id, error = %error, "Copy run aborted");
        self.emit(CopyEvent::Failed {
            run_id: run_id.to_string(),
            message: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_config_defaults() {
        let config = CopyConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_copy_config_validation() {
        let config = CopyConfig {
            batch_size: 0,
            ..CopyConfig::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        let mut config = CopyConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_song_outcome_status() {
        assert_eq!(SongOutcome::Copied.status(), CopyStatus::Copied);
        assert_eq!(
            SongOutcome::Deferred {
                message: "publish: HTTP 503 error".to_string()
            }
            .status(),
            CopyStatus::MetadataAssociated
        );
        assert!(SongOutcome::SkippedNeedsUpload.error().is_none());
    }
}
