use async_trait::async_trait;
use campsite_monitor::{AvailableCampsite, NotificationChannel, NotificationError};
use tracing::info;

/// Writes every match to the application log
///
/// Useful on its own for unattended runs and as a fallback next to channels
/// that can fail.
#[derive(Debug, Clone, Default)]
pub struct LogChannel;

impl LogChannel {
    /// Create a new log channel
    pub fn new() -> Self {
        Self
    }
}

/// One-line summary of a match
pub fn format_match(site: &AvailableCampsite) -> String {
    let mut line = format!(
        "{} ({}) at campground {}: {}",
        site.site_name, site.site_type, site.campground_id, site.stay_window
    );

    if let Some(price) = site.price {
        line.push_str(&format!(", ${:.2}/night", price));
    }
    if let Some(capacity) = site.capacity {
        line.push_str(&format!(", up to {} people", capacity));
    }
    if let Some(url) = &site.booking_url {
        line.push_str(&format!(" - book at {}", url));
    }

    line
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, matches: &[AvailableCampsite]) -> Result<(), NotificationError> {
        info!("🏕️ {} campsites available", matches.len());
        for site in matches {
            info!("  {}", format_match(site));
        }
        Ok(())
    }
}
