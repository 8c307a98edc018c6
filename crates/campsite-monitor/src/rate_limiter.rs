use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

/// Spaces out calls toward one backend host
///
/// Share one instance (behind an `Arc`) between every session that talks to
/// the same host. Each caller reserves the next free slot, so concurrent
/// callers are spread `min_interval` apart instead of bursting.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Limiter allowing one call per `min_interval`
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Minimum spacing between calls
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for this caller's slot
    ///
    /// Dropping the returned future abandons the wait; the reserved slot is
    /// simply left unused.
    pub async fn acquire(&self) {
        let slot = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next_slot {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next_slot = Some(slot + self.min_interval);
            slot
        };

        if slot > Instant::now() {
            debug!("Rate limiting: waiting {:?}", slot - Instant::now());
            sleep_until(slot).await;
        }
    }
}
