use std::time::Duration;

use async_trait::async_trait;
use campsite_monitor::{AvailableCampsite, MatchRecord, NotificationChannel, NotificationError};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

/// Body posted for each batch
#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    /// When the batch was sent
    pub sent_at: DateTime<Utc>,
    /// Number of matches in the batch
    pub count: usize,
    /// The matches
    pub matches: Vec<MatchRecord>,
}

impl WebhookPayload {
    /// Payload for a batch of matches
    pub fn new(matches: &[AvailableCampsite]) -> Self {
        Self {
            sent_at: Utc::now(),
            count: matches.len(),
            matches: matches.iter().map(MatchRecord::from).collect(),
        }
    }
}

/// Posts each batch of matches as JSON to a URL
pub struct WebhookChannel {
    client: Client,
    url: String,
}

impl WebhookChannel {
    /// Create a new webhook channel
    pub fn new(url: &str, timeout: Duration) -> Result<Self, NotificationError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            NotificationError::DeliveryFailed {
                channel: "webhook".to_string(),
                reason: format!("Failed to create HTTP client: {}", e),
            }
        })?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    // the notifier logs the failure
    fn failure(&self, reason: String) -> NotificationError {
        NotificationError::DeliveryFailed {
            channel: self.name().to_string(),
            reason,
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, matches: &[AvailableCampsite]) -> Result<(), NotificationError> {
        let payload = WebhookPayload::new(matches);
        debug!("Posting {} matches to {}", payload.count, self.url);

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.failure(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(self.failure(format!("HTTP {} - {}", status, body)));
        }

        Ok(())
    }
}
