//! # PG Seen Store
//!
//! A PostgreSQL-backed [`campsite_monitor::SeenStore`], so offline searches
//! can share their seen-matches between hosts and survive restarts.

/// Connection pool helpers
pub mod database;

/// The seen_matches table
mod store;
pub use store::*;
