//! # NetEase Cloud Music Provider
//!
//! Implements the `CloudMusicService` trait against the NetEase Cloud Music
//! web API.
//!
//! ## Overview
//!
//! This module provides:
//! - Paginated cloud-drive listing
//! - The four-call association protocol (check, token, associate, publish)
//! - Session validation from a raw cookie
//! - Client-side rate limiting and response classification
//!
//! Retrying is left to the caller; every request is sent exactly once.

pub mod connector;
pub mod error;
pub mod types;

pub use connector::NeteaseCloudConnector;
pub use error::{describe_code, NeteaseError, Result};
