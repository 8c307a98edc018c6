// Continuation of executor.rs - polling helpers for MonitoringScheduler

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::errors::ProviderError;
use crate::executor::{CycleStats, MonitoringScheduler};
use crate::provider::CampsiteProvider;
use crate::scan_types::{AvailableCampsite, Discovery, StayWindow};
use crate::window_expander::expand;

/// A campground and the providers that serve it
pub(crate) struct QueryTarget {
    pub campground_id: String,
    pub providers: Vec<Arc<dyn CampsiteProvider>>,
}

/// One provider call in a cycle
struct QueryJob {
    provider: Arc<dyn CampsiteProvider>,
    campground_id: String,
    window: StayWindow,
}

/// Result of one provider call; `None` when skipped on cancellation
struct QueryOutcome {
    provider_id: String,
    campground_id: String,
    window: StayWindow,
    result: Option<Result<Vec<AvailableCampsite>, ProviderError>>,
}

impl MonitoringScheduler {
    /// Work out which providers to query for each configured campground
    ///
    /// A provider whose listing fails is queried for every campground.
    pub(crate) async fn route_campgrounds(&mut self) -> Vec<QueryTarget> {
        let campground_ids = self.constraints.unique_campground_ids();
        let mut served: Vec<Option<HashSet<String>>> = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            if let Some(limiter) = &self.rate_limiter {
                limiter.acquire().await;
            }

            let listing = match timeout(
                self.config.provider_timeout,
                provider.list_campgrounds(),
            )
            .await
            {
                Ok(listing) => listing,
                Err(_) => Err(ProviderError::Unavailable(format!(
                    "campground listing timed out after {:?}",
                    self.config.provider_timeout
                ))),
            };

            match listing {
                Ok(campgrounds) => {
                    debug!(
                        "Provider {} lists {} campgrounds",
                        provider.provider_id(),
                        campgrounds.len()
                    );
                    served.push(Some(
                        campgrounds.into_iter().map(|c| c.facility_id).collect(),
                    ));
                }
                Err(e) => {
                    warn!(
                        "Could not list campgrounds for {}; querying it for every campground: {}",
                        provider.provider_id(),
                        e
                    );
                    self.session.last_error = Some(e.to_string());
                    served.push(None);
                }
            }
        }

        let mut targets = Vec::new();
        for campground_id in campground_ids {
            let providers: Vec<Arc<dyn CampsiteProvider>> = self
                .providers
                .iter()
                .zip(&served)
                .filter(|(_, listed)| {
                    listed
                        .as_ref()
                        .is_none_or(|ids| ids.contains(&campground_id))
                })
                .map(|(provider, _)| provider.clone())
                .collect();

            if providers.is_empty() {
                warn!(
                    "Campground {} is not listed by any provider and will not be searched",
                    campground_id
                );
                continue;
            }

            targets.push(QueryTarget {
                campground_id,
                providers,
            });
        }

        targets
    }

    /// Query every target for every stay window, collecting the raw results
    ///
    /// Returns `None` when the cycle was cancelled. Provider failures are
    /// recorded and skipped; they never abort the cycle.
    pub(crate) async fn poll_cycle(
        &mut self,
        targets: &[QueryTarget],
    ) -> Option<(CycleStats, Vec<Discovery>)> {
        let windows: Vec<StayWindow> =
            expand(&self.constraints.date_range, &self.constraints).collect();

        let mut jobs = Vec::with_capacity(targets.len() * windows.len());
        for target in targets {
            for window in &windows {
                for provider in &target.providers {
                    jobs.push(QueryJob {
                        provider: provider.clone(),
                        campground_id: target.campground_id.clone(),
                        window: *window,
                    });
                }
            }
        }

        let outcomes: Vec<QueryOutcome> = {
            let scheduler = &*self;
            stream::iter(jobs)
                .map(|job| scheduler.execute_query(job))
                .buffered(self.config.max_concurrent_queries)
                .collect()
                .await
        };

        if self.cancel.is_cancelled() {
            return None;
        }

        let mut stats = CycleStats::default();
        let mut discoveries = Vec::new();

        for outcome in outcomes {
            let Some(result) = outcome.result else {
                continue;
            };
            stats.queries += 1;

            match result {
                Ok(sites) => {
                    self.session.consecutive_failures = 0;
                    stats.raw += sites.len();
                    discoveries.extend(sites.into_iter().map(|campsite| Discovery {
                        provider_id: outcome.provider_id.clone(),
                        campsite,
                    }));
                }
                Err(e) => {
                    stats.failures += 1;
                    self.record_failure(
                        &outcome.provider_id,
                        &outcome.campground_id,
                        &outcome.window,
                        e,
                    );
                }
            }
        }

        Some((stats, discoveries))
    }

    async fn execute_query(&self, job: QueryJob) -> QueryOutcome {
        let result = if self.cancel.is_cancelled() {
            None
        } else {
            tokio::select! {
                _ = self.cancel.cancelled() => None,
                result = self.call_provider(&job) => Some(result),
            }
        };

        QueryOutcome {
            provider_id: job.provider.provider_id().to_string(),
            campground_id: job.campground_id,
            window: job.window,
            result,
        }
    }

    async fn call_provider(&self, job: &QueryJob) -> Result<Vec<AvailableCampsite>, ProviderError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }

        debug!(
            "Querying {} for campground {} ({})",
            job.provider.provider_id(),
            job.campground_id,
            job.window
        );

        match timeout(
            self.config.provider_timeout,
            job.provider.query(&job.campground_id, &job.window),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Unavailable(format!(
                "query timed out after {:?}",
                self.config.provider_timeout
            ))),
        }
    }

    fn record_failure(
        &mut self,
        provider_id: &str,
        campground_id: &str,
        window: &StayWindow,
        error: ProviderError,
    ) {
        warn!(
            "Query to {} for campground {} ({}) failed: {}",
            provider_id, campground_id, window, error
        );

        self.session.consecutive_failures += 1;
        self.session.last_error = Some(error.to_string());

        let threshold = self.config.failure_warning_threshold;
        if threshold > 0 && self.session.consecutive_failures % threshold == 0 {
            warn!(
                "{} consecutive provider failures; still monitoring. Last error: {}",
                self.session.consecutive_failures, error
            );
        }
    }
}
