//! # TaskPulse Common Library
//!
//! Shared code for the TaskPulse service including:
//! - Database initialization and row models
//! - Push message types and the per-user notification channels
//! - Configuration loading
//! - Calendar-day arithmetic for streaks and attendance
//! - Process-local TTL cache

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
pub use events::{ChannelRegistry, Notifier, PushMessage};
