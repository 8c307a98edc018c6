//! # Notification Channels
//!
//! Delivery channels for the campsite monitor: a log channel that writes
//! each match to the application log, and a webhook channel that posts each
//! batch as JSON.

/// Log-only delivery
mod log_channel;
pub use log_channel::*;

/// JSON webhook delivery
mod webhook_channel;
pub use webhook_channel::*;
