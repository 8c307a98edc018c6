use crate::errors::ProviderError;
use crate::scan_types::{AvailableCampsite, Campground, StayWindow};

/// Capabilities the engine needs from a reservation backend
///
/// Implementations are stateless per call from the engine's point of view and
/// never retry: backoff is the scheduler's job so every backend shares one policy.
#[async_trait::async_trait]
pub trait CampsiteProvider: Send + Sync {
    /// Stable identifier used in match keys
    fn provider_id(&self) -> &str;

    /// Enumerate the campgrounds this backend serves
    ///
    /// `ProviderError::Unavailable` means the backend could not be reached at
    /// all, which is different from an empty list.
    async fn list_campgrounds(&self) -> Result<Vec<Campground>, ProviderError>;

    /// Sites available for the whole stay at one campground
    ///
    /// Returns an empty list when nothing is available.
    async fn query(
        &self,
        campground_id: &str,
        stay_window: &StayWindow,
    ) -> Result<Vec<AvailableCampsite>, ProviderError>;
}
