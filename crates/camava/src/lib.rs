//! # Camava
//!
//! This crate provides a [`campsite_monitor::CampsiteProvider`] for Camava,
//! the ASP reservation system used by Santa Barbara County Parks and other
//! county park systems. Availability is scraped from the reservation page's
//! HTML.

/// HTTP client and provider implementation
mod camava_client;
pub use camava_client::*;

/// HTML scraping of the reservation and search pages
mod page_parser;
pub use page_parser::{parse_available_sites, parse_campgrounds};
