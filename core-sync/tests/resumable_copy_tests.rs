//! Integration tests for the resumable copy engine
//!
//! These tests drive `CopyCoordinator` against a scripted in-memory service
//! and verify:
//! - Dedup and counter arithmetic on a realistic library
//! - Idempotence of a second run against a target that now holds the copies
//! - Resume after cancellation processes exactly the remaining songs
//! - A crash loses at most the unsaved batch, which the next run redoes
//! - The retry bound and permanent-failure short-circuit
//! - Resuming at publish without a second association
//! - Run-level aborts on rejected sessions

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result as BridgeResult},
    AccountRole, AccountSession, Association, CloudMusicService, CloudSong, PlacementToken,
    SystemClock, UploadCheck,
};
use core_runtime::events::{CopyEvent, EventBus};
use core_sync::{
    CopyConfig, CopyCoordinator, CopyStatus, ErrorKind, ProgressStore, RetryPolicy, RunOutcome,
    SyncError,
};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Fake Service
// ============================================================================

/// Scripted per-hash behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    NeedsUpload,
    CheckAlwaysTransient,
    CheckPermanent,
    CheckUnauthorized,
    PublishAlwaysTransient,
}

/// In-memory service. A published song shows up in the target listing.
struct FakeCloudService {
    source: Vec<CloudSong>,
    target: Mutex<Vec<CloudSong>>,
    behaviors: Mutex<HashMap<String, Behavior>>,
    invalid_roles: Mutex<HashSet<AccountRole>>,
    calls: Mutex<Vec<(&'static str, String)>>,
    cancel_after_publishes: Mutex<Option<(usize, CancellationToken)>>,
    hang_after_publishes: Mutex<Option<(usize, Arc<Notify>)>>,
    publishes: Mutex<usize>,
}

impl FakeCloudService {
    fn new(source: Vec<CloudSong>, target: Vec<CloudSong>) -> Self {
        Self {
            source,
            target: Mutex::new(target),
            behaviors: Mutex::new(HashMap::new()),
            invalid_roles: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            cancel_after_publishes: Mutex::new(None),
            hang_after_publishes: Mutex::new(None),
            publishes: Mutex::new(0),
        }
    }

    fn set_behavior(&self, hash: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(hash.to_string(), behavior);
    }

    fn clear_behavior(&self, hash: &str) {
        self.behaviors.lock().unwrap().remove(hash);
    }

    fn reject_session(&self, role: AccountRole) {
        self.invalid_roles.lock().unwrap().insert(role);
    }

    fn cancel_after(&self, publishes: usize, token: CancellationToken) {
        *self.cancel_after_publishes.lock().unwrap() = Some((publishes, token));
    }

    /// Publish calls past `publishes` signal `reached` and never return.
    fn hang_after(&self, publishes: usize, reached: Arc<Notify>) {
        *self.hang_after_publishes.lock().unwrap() = Some((publishes, reached));
    }

    fn stop_hanging(&self) {
        *self.hang_after_publishes.lock().unwrap() = None;
    }

    fn target_len(&self) -> usize {
        self.target.lock().unwrap().len()
    }

    fn behavior(&self, hash: &str) -> Option<Behavior> {
        self.behaviors.lock().unwrap().get(hash).copied()
    }

    fn log(&self, operation: &'static str, hash: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((operation, hash.to_string()));
    }

    fn count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, _)| *op == operation)
            .count()
    }

    fn count_for(&self, operation: &str, hash: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, h)| *op == operation && h == hash)
            .count()
    }

    fn checked_hashes(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, _)| *op == "check")
            .map(|(_, h)| h.clone())
            .collect()
    }
}

#[async_trait]
impl CloudMusicService for FakeCloudService {
    async fn list_cloud_songs(&self, session: &AccountSession) -> BridgeResult<Vec<CloudSong>> {
        self.log("list", session.role().as_str());
        Ok(match session.role() {
            AccountRole::Source => self.source.clone(),
            AccountRole::Target => self.target.lock().unwrap().clone(),
        })
    }

    async fn check_needs_upload(
        &self,
        _session: &AccountSession,
        song: &CloudSong,
    ) -> BridgeResult<UploadCheck> {
        self.log("check", &song.content_hash);

        match self.behavior(&song.content_hash) {
            Some(Behavior::NeedsUpload) => Ok(UploadCheck {
                needs_upload: true,
                server_song_id: "0".to_string(),
            }),
            Some(Behavior::CheckAlwaysTransient) => {
                Err(BridgeError::Network("connection reset".to_string()))
            }
            Some(Behavior::CheckPermanent) => Err(BridgeError::Rejected {
                code: 400,
                message: "bad request".to_string(),
            }),
            Some(Behavior::CheckUnauthorized) => {
                Err(BridgeError::Unauthorized("cookie expired".to_string()))
            }
            _ => Ok(UploadCheck {
                needs_upload: false,
                server_song_id: format!("sid-{}", song.content_hash),
            }),
        }
    }

    async fn allocate_token(
        &self,
        _session: &AccountSession,
        song: &CloudSong,
        check: &UploadCheck,
    ) -> BridgeResult<PlacementToken> {
        self.log("token", &song.content_hash);
        Ok(PlacementToken {
            content_hash: song.content_hash.clone(),
            resource_id: 7_000 + song.content_hash.len() as i64,
            server_song_id: check.server_song_id.clone(),
        })
    }

    async fn associate_metadata(
        &self,
        _session: &AccountSession,
        token: &PlacementToken,
        song: &CloudSong,
    ) -> BridgeResult<Association> {
        self.log("associate", &song.content_hash);
        Ok(Association {
            content_hash: token.content_hash.clone(),
            cloud_song_id: token.resource_id,
        })
    }

    async fn publish(
        &self,
        _session: &AccountSession,
        association: &Association,
    ) -> BridgeResult<()> {
        self.log("publish", &association.content_hash);

        if self.behavior(&association.content_hash) == Some(Behavior::PublishAlwaysTransient) {
            return Err(BridgeError::Rejected {
                code: 523,
                message: "origin unreachable".to_string(),
            });
        }

        let hang = {
            let publishes = *self.publishes.lock().unwrap();
            match self.hang_after_publishes.lock().unwrap().as_ref() {
                Some((limit, reached)) if publishes >= *limit => Some(reached.clone()),
                _ => None,
            }
        };
        if let Some(reached) = hang {
            reached.notify_one();
            std::future::pending::<()>().await;
        }

        let published = {
            let mut publishes = self.publishes.lock().unwrap();
            *publishes += 1;
            *publishes
        };
        if let Some(song) = self
            .source
            .iter()
            .find(|song| song.content_hash == association.content_hash)
        {
            self.target.lock().unwrap().push(song.clone());
        }
        if let Some((limit, token)) = self.cancel_after_publishes.lock().unwrap().as_ref() {
            if published == *limit {
                token.cancel();
            }
        }
        Ok(())
    }

    async fn validate_session(&self, session: &AccountSession) -> BridgeResult<bool> {
        self.log("validate", session.role().as_str());
        Ok(!self.invalid_roles.lock().unwrap().contains(&session.role()))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn song(hash: &str) -> CloudSong {
    CloudSong {
        content_hash: hash.to_string(),
        title: format!("Title {}", hash),
        artist: "Artist".to_string(),
        album: "Album".to_string(),
        file_name: format!("{}.flac", hash),
        size: 30_000_000,
        bitrate: 999,
        server_song_id: None,
        needs_upload: None,
    }
}

fn songs(prefix: &str, count: usize) -> Vec<CloudSong> {
    (0..count).map(|i| song(&format!("{}{:03}", prefix, i))).collect()
}

fn instant_config(batch_size: usize) -> CopyConfig {
    CopyConfig {
        batch_size,
        retry: RetryPolicy::new(3, Duration::ZERO, Duration::ZERO),
    }
}

fn coordinator(service: &Arc<FakeCloudService>, config: CopyConfig) -> CopyCoordinator {
    CopyCoordinator::new(
        service.clone(),
        AccountSession::new(AccountRole::Source, "MUSIC_U=source")
            .with_account_name(Some("main".to_string())),
        AccountSession::new(AccountRole::Target, "MUSIC_U=target"),
        config,
    )
}

fn progress_path(dir: &TempDir) -> PathBuf {
    dir.path().join("data").join("progress.json")
}

fn load_store(dir: &TempDir) -> ProgressStore {
    ProgressStore::load(progress_path(dir), Arc::new(SystemClock)).unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_library_scenario_counters() {
    // 98 songs already in the target, 120 distinct new hashes, 27 duplicate entries
    let in_target = songs("t", 98);
    let new_songs = songs("n", 120);
    let mut source = in_target.clone();
    source.extend(new_songs.iter().cloned());
    source.extend(new_songs.iter().take(27).cloned());
    assert_eq!(source.len(), 245);

    let service = Arc::new(FakeCloudService::new(source, in_target));
    for song in new_songs.iter().skip(40).take(5) {
        service.set_behavior(&song.content_hash, Behavior::NeedsUpload);
    }

    let dir = TempDir::new().unwrap();
    let mut store = load_store(&dir);
    let report = coordinator(&service, instant_config(10))
        .run(&mut store)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.processed, 120);

    let summary = report.summary;
    assert_eq!(summary.total_source, 245);
    assert_eq!(summary.already_in_target, 98);
    assert_eq!(summary.copied, 115);
    assert_eq!(summary.skipped, 5);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.remaining, 0);
    assert_eq!(summary.copied + summary.skipped + summary.failed, 120);

    // One check per distinct new hash, none for songs already in the target
    assert_eq!(service.count("check"), 120);
    assert_eq!(service.count("publish"), 115);
    assert_eq!(service.count_for("check", "t000"), 0);

    // Copied hashes joined the target set
    let reloaded = load_store(&dir);
    assert!(reloaded.target_hashes().contains("n000"));
    assert_eq!(reloaded.summary(), summary);
    assert_eq!(reloaded.source_account(), Some("main"));
    assert_eq!(reloaded.target_account(), None);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let in_target = songs("t", 98);
    let new_songs = songs("n", 120);
    let mut source = in_target.clone();
    source.extend(new_songs.iter().cloned());
    source.extend(new_songs.iter().take(27).cloned());

    let service = Arc::new(FakeCloudService::new(source, in_target));
    for song in new_songs.iter().skip(40).take(5) {
        service.set_behavior(&song.content_hash, Behavior::NeedsUpload);
    }

    let dir = TempDir::new().unwrap();
    let mut store = load_store(&dir);
    let first = coordinator(&service, instant_config(10))
        .run(&mut store)
        .await
        .unwrap();
    let calls_after_first = service.count("check");

    // The target now lists every copy from the first run
    assert_eq!(service.target_len(), 98 + 115);

    let mut store = load_store(&dir);
    let second = coordinator(&service, instant_config(10))
        .run(&mut store)
        .await
        .unwrap();

    assert_eq!(second.outcome, RunOutcome::Completed);
    assert_eq!(second.processed, 0);
    assert_eq!(second.summary, first.summary);
    assert_eq!(second.summary.already_in_target, 98);
    assert_eq!(second.summary.copied, 115);
    assert_eq!(second.summary.remaining, 0);
    assert_eq!(service.count("check"), calls_after_first);
    assert_eq!(service.target_len(), 98 + 115);
}

#[tokio::test]
async fn test_crash_loses_only_unsaved_batch() {
    let service = Arc::new(FakeCloudService::new(songs("k", 20), Vec::new()));
    let reached = Arc::new(Notify::new());
    // Songs k000..k012 publish, k013 hangs mid-protocol
    service.hang_after(13, reached.clone());

    let dir = TempDir::new().unwrap();
    let mut store = load_store(&dir);
    {
        let crashing = coordinator(&service, instant_config(10));
        tokio::select! {
            result = crashing.run(&mut store) => panic!("run should not finish: {:?}", result),
            _ = reached.notified() => {}
        }
    }
    // Process dies: no final checkpoint
    drop(store);

    let store = load_store(&dir);
    assert_eq!(store.summary().copied, 10);
    assert_eq!(store.get("k009").unwrap().status, CopyStatus::Copied);
    assert!(store.get("k010").is_none());

    service.stop_hanging();
    let mut store = store;
    let report = coordinator(&service, instant_config(10))
        .run(&mut store)
        .await
        .unwrap();

    // k010..k012 were published before the crash and are now in the target
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.processed, 7);
    assert_eq!(report.summary.already_in_target, 3);
    assert_eq!(report.summary.copied, 17);
    assert_eq!(report.summary.remaining, 0);
    for hash in ["k010", "k011", "k012"] {
        assert_eq!(service.count_for("associate", hash), 1);
    }

    // Only the song in flight at the crash went through the protocol again
    let checked = service.checked_hashes();
    let redone: HashSet<&String> = checked
        .iter()
        .filter(|hash| checked.iter().filter(|h| h == hash).count() > 1)
        .collect();
    assert_eq!(redone.len(), 1);
    assert!(redone.contains(&"k013".to_string()));
    assert_eq!(service.count_for("associate", "k013"), 2);
    assert_eq!(service.target_len(), 20);
}

#[tokio::test]
async fn test_crash_before_publish_redoes_unsaved_batch() {
    let service = Arc::new(FakeCloudService::new(songs("q", 8), Vec::new()));
    for hash in ["q005", "q006"] {
        service.set_behavior(hash, Behavior::CheckAlwaysTransient);
    }
    let reached = Arc::new(Notify::new());
    // q000..q004 publish, q005 and q006 fail, q007 hangs
    service.hang_after(5, reached.clone());

    let dir = TempDir::new().unwrap();
    let mut store = load_store(&dir);
    {
        let crashing = coordinator(&service, instant_config(4));
        tokio::select! {
            result = crashing.run(&mut store) => panic!("run should not finish: {:?}", result),
            _ = reached.notified() => {}
        }
    }
    drop(store);

    // Failed outcomes after the first checkpoint were never saved
    let store = load_store(&dir);
    assert_eq!(store.summary().copied, 4);
    assert!(store.get("q005").is_none());
    assert!(store.get("q006").is_none());

    service.stop_hanging();
    service.clear_behavior("q005");
    service.clear_behavior("q006");
    let mut store = store;
    let report = coordinator(&service, instant_config(4))
        .run(&mut store)
        .await
        .unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.summary.copied, 7);
    assert_eq!(report.summary.already_in_target, 1);
    assert_eq!(report.summary.failed, 0);
    assert_eq!(service.count_for("check", "q005"), 4);
    assert_eq!(service.count_for("check", "q006"), 4);
    assert_eq!(service.count_for("check", "q007"), 2);
    assert_eq!(service.count_for("check", "q004"), 1);
}

#[tokio::test]
async fn test_resume_after_cancellation_processes_only_remaining() {
    let source = songs("r", 120);
    let service = Arc::new(FakeCloudService::new(source, Vec::new()));

    let dir = TempDir::new().unwrap();
    let mut store = load_store(&dir);
    let first = coordinator(&service, instant_config(10));
    service.cancel_after(50, first.cancellation_token());

    let report = first.run(&mut store).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.processed, 50);
    assert_eq!(report.summary.copied, 50);
    assert_eq!(report.summary.remaining, 70);

    // Restart from what is on disk
    let store = load_store(&dir);
    assert_eq!(store.summary().remaining, 70);

    let bus = EventBus::new(500);
    let mut events = bus.subscribe();
    let mut store = store;
    let report = coordinator(&service, instant_config(10))
        .with_event_bus(bus)
        .run(&mut store)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.processed, 70);
    assert_eq!(report.summary.copied, 120);
    assert_eq!(report.summary.remaining, 0);

    match events.recv().await.unwrap() {
        CopyEvent::Started { to_process, .. } => assert_eq!(to_process, 70),
        other => panic!("expected Started, got {:?}", other),
    }

    // No song was checked twice across both runs
    let checked = service.checked_hashes();
    let distinct: HashSet<&String> = checked.iter().collect();
    assert_eq!(checked.len(), 120);
    assert_eq!(distinct.len(), 120);
}

#[tokio::test]
async fn test_transient_failure_stops_at_retry_bound() {
    let service = Arc::new(FakeCloudService::new(songs("x", 2), Vec::new()));
    service.set_behavior("x000", Behavior::CheckAlwaysTransient);

    let dir = TempDir::new().unwrap();
    let mut store = load_store(&dir);
    let report = coordinator(&service, instant_config(10))
        .run(&mut store)
        .await
        .unwrap();

    assert_eq!(service.count_for("check", "x000"), 3);
    assert_eq!(service.count_for("token", "x000"), 0);

    let record = store.get("x000").unwrap();
    assert_eq!(record.status, CopyStatus::Failed);
    assert_eq!(record.attempt_count, 3);
    assert_eq!(record.last_error_kind, Some(ErrorKind::Network));
    assert!(record.last_error.as_deref().unwrap().contains("connection reset"));

    // The failure is confined to its song
    assert_eq!(store.get("x001").unwrap().status, CopyStatus::Copied);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.copied, 1);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let service = Arc::new(FakeCloudService::new(songs("p", 1), Vec::new()));
    service.set_behavior("p000", Behavior::CheckPermanent);

    let dir = TempDir::new().unwrap();
    let mut store = load_store(&dir);
    coordinator(&service, instant_config(10))
        .run(&mut store)
        .await
        .unwrap();

    assert_eq!(service.count_for("check", "p000"), 1);
    let record = store.get("p000").unwrap();
    assert_eq!(record.status, CopyStatus::Failed);
    assert_eq!(record.attempt_count, 1);
    assert_eq!(record.last_error_kind, Some(ErrorKind::Permanent));
}

#[tokio::test]
async fn test_failed_song_is_not_revisited() {
    let service = Arc::new(FakeCloudService::new(songs("f", 1), Vec::new()));
    service.set_behavior("f000", Behavior::CheckPermanent);

    let dir = TempDir::new().unwrap();
    let mut store = load_store(&dir);
    coordinator(&service, instant_config(10))
        .run(&mut store)
        .await
        .unwrap();

    // Even once the service would accept it, a terminal record stays put
    service.clear_behavior("f000");
    let mut store = load_store(&dir);
    let report = coordinator(&service, instant_config(10))
        .run(&mut store)
        .await
        .unwrap();

    assert_eq!(report.processed, 0);
    assert_eq!(service.count_for("check", "f000"), 1);
    assert_eq!(store.get("f000").unwrap().status, CopyStatus::Failed);
}

#[tokio::test]
async fn test_publish_failure_resumes_at_publish() {
    let service = Arc::new(FakeCloudService::new(songs("m", 1), Vec::new()));
    service.set_behavior("m000", Behavior::PublishAlwaysTransient);

    let dir = TempDir::new().unwrap();
    let mut store = load_store(&dir);
    let report = coordinator(&service, instant_config(10))
        .run(&mut store)
        .await
        .unwrap();

    let record = store.get("m000").unwrap();
    assert_eq!(record.status, CopyStatus::MetadataAssociated);
    assert!(record.association.is_some());
    assert_eq!(service.count_for("associate", "m000"), 1);
    assert_eq!(service.count_for("publish", "m000"), 3);
    assert_eq!(report.summary.remaining, 1);
    assert_eq!(report.summary.failed, 0);

    // Next run picks up at publish from the persisted association
    service.clear_behavior("m000");
    let mut store = load_store(&dir);
    let report = coordinator(&service, instant_config(10))
        .run(&mut store)
        .await
        .unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.summary.copied, 1);
    assert_eq!(service.count_for("check", "m000"), 1);
    assert_eq!(service.count_for("token", "m000"), 1);
    assert_eq!(service.count_for("associate", "m000"), 1);
    assert_eq!(service.count_for("publish", "m000"), 4);

    let record = store.get("m000").unwrap();
    assert_eq!(record.status, CopyStatus::Copied);
    assert!(record.association.is_none());
    assert_eq!(record.attempt_count, 7);
}

#[tokio::test]
async fn test_auth_error_mid_run_aborts_and_checkpoints() {
    let service = Arc::new(FakeCloudService::new(songs("a", 5), Vec::new()));
    service.set_behavior("a002", Behavior::CheckUnauthorized);

    let bus = EventBus::new(50);
    let mut events = bus.subscribe();

    let dir = TempDir::new().unwrap();
    let mut store = load_store(&dir);
    let result = coordinator(&service, instant_config(10))
        .with_event_bus(bus)
        .run(&mut store)
        .await;

    let error = result.unwrap_err();
    assert!(matches!(error, SyncError::Authentication { ref account, .. } if account == "target"));
    assert!(error.is_auth());

    // Not retried, and no later song was attempted
    assert_eq!(service.count_for("check", "a002"), 1);
    assert_eq!(service.count_for("check", "a003"), 0);

    // Prior results were persisted even though the batch was not full
    let reloaded = load_store(&dir);
    assert_eq!(reloaded.get("a000").unwrap().status, CopyStatus::Copied);
    assert_eq!(reloaded.get("a001").unwrap().status, CopyStatus::Copied);
    let aborted = reloaded.get("a002").unwrap();
    assert!(!aborted.status.is_terminal());
    assert_eq!(aborted.last_error_kind, Some(ErrorKind::Auth));
    assert!(reloaded.get("a003").is_none());

    let mut saw_failed = false;
    while let Ok(event) = events.try_recv() {
        if let CopyEvent::Failed { message, .. } = event {
            assert!(message.contains("cookie expired"));
            saw_failed = true;
        }
    }
    assert!(saw_failed);
}

#[tokio::test]
async fn test_invalid_session_aborts_before_listing() {
    let service = Arc::new(FakeCloudService::new(songs("v", 3), Vec::new()));
    service.reject_session(AccountRole::Target);

    let dir = TempDir::new().unwrap();
    let mut store = load_store(&dir);
    let result = coordinator(&service, instant_config(10))
        .run(&mut store)
        .await;

    assert!(matches!(result, Err(SyncError::SessionInvalid { ref account }) if account == "target"));
    assert_eq!(service.count("list"), 0);
    assert_eq!(service.count("check"), 0);
}

#[tokio::test]
async fn test_listing_needs_upload_skips_without_check() {
    let mut source = songs("u", 2);
    source[0].needs_upload = Some(true);
    let service = Arc::new(FakeCloudService::new(source, Vec::new()));

    let dir = TempDir::new().unwrap();
    let mut store = load_store(&dir);
    let report = coordinator(&service, instant_config(10))
        .run(&mut store)
        .await
        .unwrap();

    assert_eq!(service.count_for("check", "u000"), 0);
    assert_eq!(
        store.get("u000").unwrap().status,
        CopyStatus::SkippedNeedsUpload
    );
    assert_eq!(report.summary.skipped, 1);
    assert_eq!(report.summary.copied, 1);
}

#[tokio::test]
async fn test_events_follow_run_progress() {
    let service = Arc::new(FakeCloudService::new(songs("e", 4), Vec::new()));
    service.set_behavior("e001", Behavior::NeedsUpload);

    let bus = EventBus::new(50);
    let mut events = bus.subscribe();

    let dir = TempDir::new().unwrap();
    let mut store = load_store(&dir);
    coordinator(&service, instant_config(2))
        .with_event_bus(bus)
        .run(&mut store)
        .await
        .unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }

    let kinds: Vec<&str> = received.iter().map(|e| e.description()).collect();
    assert_eq!(
        kinds,
        vec![
            "Copy started",
            "Song processed",
            "Song processed",
            "Progress saved",
            "Song processed",
            "Song processed",
            "Progress saved",
            "Copy completed",
        ]
    );

    match &received[2] {
        CopyEvent::SongFinished {
            index,
            total,
            status,
            ..
        } => {
            assert_eq!(*index, 2);
            assert_eq!(*total, 4);
            assert_eq!(status, "skipped_needs_upload");
        }
        other => panic!("expected SongFinished, got {:?}", other),
    }
}

#[tokio::test]
async fn test_batch_size_one_persists_every_song() {
    let service = Arc::new(FakeCloudService::new(songs("b", 3), Vec::new()));

    let dir = TempDir::new().unwrap();
    let mut store = load_store(&dir);
    let first = coordinator(&service, instant_config(1));
    service.cancel_after(1, first.cancellation_token());

    let report = first.run(&mut store).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.processed, 1);

    let reloaded = load_store(&dir);
    assert_eq!(reloaded.get("b000").unwrap().status, CopyStatus::Copied);
    assert!(reloaded.get("b001").is_none());
}
