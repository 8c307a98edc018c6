/// Failure of a single provider call
///
/// All variants are recovered by the scheduler: the failing
/// campground/window pair is skipped for the cycle and retried next cycle.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Backend could not be reached (transport failure, timeout, 5xx, rate limited)
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Backend refused the request, e.g. an unknown campground id
    #[error("Provider rejected request: {0}")]
    Rejected(String),

    /// Backend answered with something that could not be interpreted
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Failure of one notification channel
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// Delivery to a channel failed
    #[error("Notification delivery failed on {channel}: {reason}")]
    DeliveryFailed {
        /// Channel name
        channel: String,
        /// What went wrong
        reason: String,
    },
}

/// Failure of the offline seen-store
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// File system error
    #[error("Seen-store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A key could not be encoded or decoded
    #[error("Seen-store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other backend (database) failure
    #[error("Seen-store backend error: {0}")]
    Backend(String),
}

/// Errors that stop a monitoring session before its loop starts
#[derive(thiserror::Error, Debug)]
pub enum MonitorError {
    /// Constraints or engine configuration are unusable
    #[error("Configuration error: {0}")]
    ConfigurationInvalid(String),

    /// Seen-store could not be opened or loaded
    #[error(transparent)]
    Store(#[from] StoreError),
}
