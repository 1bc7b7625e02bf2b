//! # Host Bridge Traits
//!
//! Capability traits that the copy engine consumes but does not implement.
//!
//! ## Overview
//!
//! This crate defines the contract between the engine and the outside world.
//! Each trait represents a capability that must be supplied by an adapter
//! crate (a desktop HTTP client, a concrete music service connector) or by a
//! test double.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations with timeouts and TLS
//!
//! ### Remote service
//! - [`CloudMusicService`](cloud::CloudMusicService) - Cloud-drive listing and
//!   the hash-based association protocol
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Adapters
//! should map their failures onto the classified variants (`Unauthorized`,
//! `Network`, `Rejected`) so the engine can decide between retrying, skipping
//! and aborting.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so implementations can be
//! shared behind `Arc` across async tasks.

pub mod cloud;
pub mod error;
pub mod http;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use cloud::{
    AccountRole, AccountSession, Association, CloudMusicService, CloudSong, PlacementToken,
    UploadCheck,
};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use time::{Clock, LogLevel, SystemClock};
