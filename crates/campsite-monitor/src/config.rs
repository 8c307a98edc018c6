use std::time::Duration;

use validator::Validate;

use crate::errors::MonitorError;
use crate::scan_types::{MAX_NIGHTS, NightsSpec, SearchConstraints};

/// Engine tuning shared by every session
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Smallest polling interval a search may ask for (default: 5 minutes)
    pub min_polling_interval: Duration,

    /// Provider queries in flight at once within a cycle (default: 4)
    pub max_concurrent_queries: usize,

    /// Upper bound on a single provider call (default: 30 seconds)
    pub provider_timeout: Duration,

    /// Random delay added to each sleep, up to this much (default: 30 seconds)
    pub max_jitter: Duration,

    /// Consecutive failed provider calls before warning the user (default: 5)
    pub failure_warning_threshold: u32,

    /// Sleep after a fully failed cycle once the threshold is reached (default: 30 minutes)
    pub error_backoff: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            min_polling_interval: Duration::from_secs(5 * 60), // 5 minutes
            max_concurrent_queries: 4,
            provider_timeout: Duration::from_secs(30),
            max_jitter: Duration::from_secs(30),
            failure_warning_threshold: 5,
            error_backoff: Duration::from_secs(30 * 60), // 30 minutes
        }
    }
}

impl MonitorConfig {
    fn check(&self) -> Result<(), MonitorError> {
        if self.max_concurrent_queries == 0 {
            return Err(MonitorError::ConfigurationInvalid(
                "max_concurrent_queries must be at least 1".to_string(),
            ));
        }
        if self.provider_timeout.is_zero() {
            return Err(MonitorError::ConfigurationInvalid(
                "provider_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl SearchConstraints {
    /// Validate the constraints against the engine configuration
    ///
    /// Every problem surfaces here, before a session starts polling.
    pub fn check(&self, config: &MonitorConfig) -> Result<(), MonitorError> {
        config.check()?;
        self.validate()
            .map_err(|e| MonitorError::ConfigurationInvalid(e.to_string()))?;

        if self.campground_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(MonitorError::ConfigurationInvalid(
                "campground ids must not be blank".to_string(),
            ));
        }

        if self.date_range.start > self.date_range.end {
            return Err(MonitorError::ConfigurationInvalid(format!(
                "date range start {} is after end {}",
                self.date_range.start, self.date_range.end
            )));
        }

        if let Some(nights) = self.nights {
            check_nights(&nights)?;
        }

        if self.polling_interval < config.min_polling_interval {
            return Err(MonitorError::ConfigurationInvalid(format!(
                "polling interval {:?} is below the minimum of {:?}",
                self.polling_interval, config.min_polling_interval
            )));
        }

        if let Some(equipment) = self.equipment {
            if equipment.min_length == Some(0) {
                return Err(MonitorError::ConfigurationInvalid(
                    "equipment length must be positive".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn check_nights(nights: &NightsSpec) -> Result<(), MonitorError> {
    let (min, max) = nights.bounds();
    if min == 0 {
        return Err(MonitorError::ConfigurationInvalid(
            "nights must be at least 1".to_string(),
        ));
    }
    if min > max {
        return Err(MonitorError::ConfigurationInvalid(format!(
            "minimum nights {} exceeds maximum {}",
            min, max
        )));
    }
    if max > MAX_NIGHTS {
        return Err(MonitorError::ConfigurationInvalid(format!(
            "stays longer than {} nights are not supported",
            MAX_NIGHTS
        )));
    }
    Ok(())
}
