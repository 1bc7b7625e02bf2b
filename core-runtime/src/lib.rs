//! # Core Runtime Module
//!
//! Provides the ambient runtime infrastructure for the copy engine:
//! - Logging and tracing infrastructure
//! - Configuration management (run options and the account cookie file)
//! - Event bus for progress reporting
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the engine and the CLI
//! depend on. It establishes the logging conventions, the validated
//! configuration types, and the event broadcasting mechanism used to report
//! per-song progress without coupling the engine to a terminal.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
