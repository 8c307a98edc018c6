use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{info, warn};

use crate::errors::NotificationError;
use crate::scan_types::AvailableCampsite;

/// One delivery channel (log, webhook, email, ...)
#[async_trait::async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Name used in logs and failure reports
    fn name(&self) -> &str;

    /// Deliver a batch of new matches
    async fn notify(&self, matches: &[AvailableCampsite]) -> Result<(), NotificationError>;
}

/// Outcome of delivering one batch to one channel
#[derive(Debug, Clone)]
pub struct ChannelOutcome {
    /// Channel name
    pub channel: String,
    /// Delivery result
    pub result: Result<(), NotificationError>,
}

impl ChannelOutcome {
    /// Whether delivery succeeded
    pub fn is_delivered(&self) -> bool {
        self.result.is_ok()
    }
}

/// Fans a batch of matches out to every configured channel
///
/// Channels are independent: one failing never blocks or aborts the others.
#[derive(Clone, Default)]
pub struct Notifier {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl Notifier {
    /// Notifier over the given channels
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    /// Add a channel
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Deliver one batch to all channels concurrently
    ///
    /// An empty batch is not delivered anywhere.
    pub async fn dispatch(&self, matches: &[AvailableCampsite]) -> Vec<ChannelOutcome> {
        if matches.is_empty() {
            return Vec::new();
        }

        let deliveries = self.channels.iter().map(|channel| async move {
            let result = channel.notify(matches).await;
            match &result {
                Ok(()) => info!(
                    "Delivered {} matches via {}",
                    matches.len(),
                    channel.name()
                ),
                Err(e) => warn!("{}", e),
            }
            ChannelOutcome {
                channel: channel.name().to_string(),
                result,
            }
        });

        join_all(deliveries).await
    }
}
