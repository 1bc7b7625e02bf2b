//! # Event Bus System
//!
//! Progress reporting for copy runs over `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The engine emits a [`CopyEvent`] at every observable step of a run: start,
//! each finished song, each checkpoint, and the final outcome. Front ends
//! subscribe and render them however they like; the engine never waits on a
//! subscriber and does not care whether anyone is listening.
//!
//! ```text
//! ┌────────────────┐     emit      ┌───────────┐    subscribe   ┌─────────────┐
//! │ CopyCoordinator├──────────────>│ EventBus  ├───────────────>│ CLI printer │
//! └────────────────┘               └───────────┘                └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CopyEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus.emit(CopyEvent::Checkpointed {
//!     run_id: "run-1".to_string(),
//!     processed: 10,
//! }).ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.description(), "Progress saved");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! `emit` returns `Err` only when there are no subscribers; callers treat that
//! as a no-op. Slow subscribers receive `RecvError::Lagged` and may continue.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{self, error::SendError};

pub use tokio::sync::broadcast::error::RecvError;
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall further behind than this receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Events emitted during a copy run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CopyEvent {
    /// Both lists fetched and the remaining set computed.
    Started {
        run_id: String,
        total_source: u64,
        already_in_target: u64,
        /// Songs this run will attempt
        to_process: u64,
    },
    /// A song left the pipeline for this run.
    SongFinished {
        run_id: String,
        /// 1-based position within this run
        index: u64,
        total: u64,
        content_hash: String,
        title: String,
        artist: String,
        /// Status the song's record ended in
        status: String,
        /// Error message when the song did not complete
        error: Option<String>,
    },
    /// Progress file written.
    Checkpointed { run_id: String, processed: u64 },
    /// Every song in the remaining set was processed.
    Completed {
        run_id: String,
        copied: u64,
        skipped: u64,
        failed: u64,
        remaining: u64,
    },
    /// Stopped early by a cancellation request.
    Cancelled { run_id: String, processed: u64 },
    /// Run aborted by a fatal error.
    Failed { run_id: String, message: String },
}

impl CopyEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CopyEvent::Started { .. } => "Copy started",
            CopyEvent::SongFinished { .. } => "Song processed",
            CopyEvent::Checkpointed { .. } => "Progress saved",
            CopyEvent::Completed { .. } => "Copy completed",
            CopyEvent::Cancelled { .. } => "Copy cancelled",
            CopyEvent::Failed { .. } => "Copy failed",
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CopyEvent::Failed { .. } => EventSeverity::Error,
            CopyEvent::Cancelled { .. } => EventSeverity::Warning,
            CopyEvent::SongFinished { error: Some(_), .. } => EventSeverity::Warning,
            CopyEvent::Started { .. } | CopyEvent::Completed { .. } => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Run the event belongs to.
    pub fn run_id(&self) -> &str {
        match self {
            CopyEvent::Started { run_id, .. }
            | CopyEvent::SongFinished { run_id, .. }
            | CopyEvent::Checkpointed { run_id, .. }
            | CopyEvent::Completed { run_id, .. }
            | CopyEvent::Cancelled { run_id, .. }
            | CopyEvent::Failed { run_id, .. } => run_id,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Central event bus for broadcasting copy events.
///
/// Cloning is cheap; every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CopyEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns an error if there are no active subscribers.
    pub fn emit(&self, event: CopyEvent) -> Result<usize, SendError<CopyEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CopyEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
