//! # Copy Engine
//!
//! Resumable migration of cloud-drive song associations between two accounts
//! of the same music service.
//!
//! ## Overview
//!
//! The server already stores the audio bytes of most songs, keyed by content
//! hash. Copying a song into another account therefore only needs a chain of
//! association calls, never an upload. This crate drives that chain for a whole
//! cloud drive and makes the migration safe to interrupt and repeat:
//! - Songs already present in the target are never touched
//! - Every outcome is recorded durably before the run moves on
//! - A restarted run processes exactly the songs that have no terminal record
//!
//! ## Components
//!
//! - **Deduplicator** (`dedup`): Remaining-set computation by content hash
//! - **Retry Policy** (`retry`): Transient/permanent/auth classification and bounded retry
//! - **Song State Machine** (`record`): Per-song status with validated transitions
//! - **Progress Store** (`progress`): Atomic, checkpointed ledger of outcomes and counters
//! - **Copy Coordinator** (`coordinator`): Drives each song through the protocol

pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod progress;
pub mod record;
pub mod retry;

pub use coordinator::{CopyConfig, CopyCoordinator, CopyReport, RunOutcome};
pub use error::{Result, SyncError};
pub use progress::{ProgressCounters, ProgressStore};
pub use record::{CopyStatus, ProgressRecord};
pub use retry::{classify, ErrorKind, RetryPolicy};
