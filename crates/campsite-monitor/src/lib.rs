//! # Campsite Monitor
//!
//! This crate provides the monitoring engine that watches campsite reservation
//! backends for newly available inventory. It expands a date range into stay
//! windows, queries pluggable providers, filters results against the user's
//! constraints, deduplicates matches across polling cycles and dispatches one
//! notification batch per cycle.

/// Engine configuration and constraint validation
mod config;
pub use config::*;

/// Error types for providers, notifications, seen-stores and startup
mod errors;
pub use errors::*;

/// Data model: stay windows, constraints, campsites and match keys
mod scan_types;
pub use scan_types::*;

/// Expansion of a date range into candidate stay windows
pub mod window_expander;
pub use window_expander::{StayWindows, expand};

/// Constraint matching over raw provider results
pub mod result_filter;

/// Provider capability trait
mod provider;
pub use provider::*;

/// Durable seen-match stores
mod seen_store;
pub use seen_store::*;

/// Deduplication of matches across cycles
mod dedup;
pub use dedup::*;

/// Notification channel trait and fan-out
mod notification_service;
pub use notification_service::*;

/// Shared rate limiter toward one backend host
mod rate_limiter;
pub use rate_limiter::*;

/// Monitoring scheduler state machine
mod executor;
pub use executor::*;

mod executor_helpers;

pub use tokio_util::sync::CancellationToken;
