use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::dedup::Deduplicator;
use crate::errors::MonitorError;
use crate::notification_service::Notifier;
use crate::provider::CampsiteProvider;
use crate::rate_limiter::RateLimiter;
use crate::result_filter;
use crate::scan_types::*;
use crate::seen_store::SeenStore;
use crate::window_expander::expand;

/// Where the scheduler is in its polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Session initialized, waiting for the first cycle
    Idle,
    /// Querying providers
    Polling,
    /// Filtering, deduplicating and notifying
    Evaluating,
    /// Waiting for the next cycle
    Sleeping,
    /// Finished
    Terminated(TerminationReason),
}

/// State of one monitoring run, owned by the scheduler
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringSession {
    /// Session identifier for logs
    pub id: Uuid,
    /// When the session was created
    pub started_at: DateTime<Utc>,
    /// Polling cycles started
    pub cycle_count: u64,
    /// Matches handed to the notifier
    pub matches_notified: u64,
    /// Size of the seen-set
    pub seen_count: usize,
    /// Provider calls that failed in a row
    pub consecutive_failures: u32,
    /// Most recent recovered error
    pub last_error: Option<String>,
}

impl MonitoringSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            cycle_count: 0,
            matches_notified: 0,
            seen_count: 0,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// Counts from one polling pass
#[derive(Debug, Clone, Default)]
pub(crate) struct CycleStats {
    pub queries: usize,
    pub failures: usize,
    pub raw: usize,
    pub matching: usize,
}

impl CycleStats {
    fn all_failed(&self) -> bool {
        self.queries > 0 && self.failures == self.queries
    }
}

/// Main monitoring engine
///
/// Repeatedly queries every provider for every campground and stay window,
/// filters and deduplicates the results, and notifies once per new match.
pub struct MonitoringScheduler {
    pub(crate) constraints: SearchConstraints,
    pub(crate) providers: Vec<Arc<dyn CampsiteProvider>>,
    pub(crate) notifier: Notifier,
    pub(crate) seen_store: Option<Arc<dyn SeenStore>>,
    pub(crate) rate_limiter: Option<Arc<RateLimiter>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) config: MonitorConfig,
    pub(crate) session: MonitoringSession,
    state: SchedulerState,
}

impl MonitoringScheduler {
    /// Build a scheduler, rejecting unusable configuration up front
    pub fn new(
        constraints: SearchConstraints,
        providers: Vec<Arc<dyn CampsiteProvider>>,
        notifier: Notifier,
        seen_store: Option<Arc<dyn SeenStore>>,
        config: Option<MonitorConfig>,
    ) -> Result<Self, MonitorError> {
        let config = config.unwrap_or_default();
        constraints.check(&config)?;

        if providers.is_empty() {
            return Err(MonitorError::ConfigurationInvalid(
                "at least one provider is required".to_string(),
            ));
        }

        let seen_store = match (constraints.offline, seen_store) {
            (true, None) => {
                return Err(MonitorError::ConfigurationInvalid(
                    "offline search needs a seen-store".to_string(),
                ));
            }
            (true, store) => store,
            (false, Some(_)) => {
                warn!("Seen-store supplied but offline search is disabled; ignoring it");
                None
            }
            (false, None) => None,
        };

        if notifier.channel_count() == 0 {
            warn!("No notification channels configured; matches will only be logged");
        }

        Ok(Self {
            constraints,
            providers,
            notifier,
            seen_store,
            rate_limiter: None,
            cancel: CancellationToken::new(),
            config,
            session: MonitoringSession::new(),
            state: SchedulerState::Idle,
        })
    }

    /// Space provider calls through a limiter shared with other sessions
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// Tie this session to an external cancellation token
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the session when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Session bookkeeping
    pub fn session(&self) -> &MonitoringSession {
        &self.session
    }

    /// Current loop state
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Run the monitoring loop until the mode says stop or the session is cancelled
    pub async fn run(&mut self) -> TerminationReason {
        info!(
            "Starting monitoring session {} ({:?}, {} campgrounds, {} providers)",
            self.session.id,
            self.constraints.mode,
            self.constraints.unique_campground_ids().len(),
            self.providers.len()
        );

        let reason = self.drive().await;
        self.transition(SchedulerState::Terminated(reason));

        info!(
            "Monitoring session {} terminated: {} after {} cycles, {} matches notified",
            self.session.id, reason, self.session.cycle_count, self.session.matches_notified
        );

        reason
    }

    async fn drive(&mut self) -> TerminationReason {
        let dedup = match self.open_deduplicator().await {
            Ok(dedup) => dedup,
            Err(e) => {
                error!("Failed to open seen-store: {}", e);
                self.session.last_error = Some(e.to_string());
                return TerminationReason::Error;
            }
        };
        self.session.seen_count = dedup.seen_count().await;

        let targets = self.route_campgrounds().await;
        if targets.is_empty() {
            let message = "no configured campground is served by any provider".to_string();
            error!("{}", message);
            self.session.last_error = Some(message);
            return TerminationReason::Error;
        }

        let window_count = expand(&self.constraints.date_range, &self.constraints).count();
        if window_count == 0 {
            warn!("Search constraints produce no stay windows; nothing will be queried");
        } else {
            info!(
                "Session {}: {} stay windows per campground",
                self.session.id, window_count
            );
        }

        loop {
            self.transition(SchedulerState::Polling);
            if self.cancel.is_cancelled() {
                return TerminationReason::Cancelled;
            }

            self.session.cycle_count += 1;
            let cycle = self.session.cycle_count;
            info!("Starting cycle {}", cycle);

            let Some((mut stats, discoveries)) = self.poll_cycle(&targets).await else {
                info!("Cycle {} abandoned on cancellation", cycle);
                return TerminationReason::Cancelled;
            };

            self.transition(SchedulerState::Evaluating);
            let matching: Vec<Discovery> = discoveries
                .into_iter()
                .filter(|d| result_filter::accepts(&self.constraints, &d.campsite))
                .collect();
            stats.matching = matching.len();
            let admitted = self.evaluate(&dedup, matching).await;

            info!(
                "Cycle {} finished: {} queries ({} failed), {} available, {} matching, {} new",
                cycle, stats.queries, stats.failures, stats.raw, stats.matching, admitted
            );

            match self.constraints.mode {
                SearchMode::RunOnce if stats.all_failed() => return TerminationReason::Error,
                SearchMode::RunOnce => return TerminationReason::Completed,
                SearchMode::RunUntilMatch if admitted > 0 => return TerminationReason::Matched,
                SearchMode::RunUntilMatch | SearchMode::RunForever => {}
            }

            self.transition(SchedulerState::Sleeping);
            let pause = self.next_sleep(&stats);
            debug!("Sleeping {:?} before cycle {}", pause, cycle + 1);

            tokio::select! {
                _ = self.cancel.cancelled() => return TerminationReason::Cancelled,
                _ = sleep(pause) => {}
            }
        }
    }

    async fn open_deduplicator(&self) -> Result<Deduplicator, MonitorError> {
        match &self.seen_store {
            Some(store) => Ok(Deduplicator::with_store(store.clone()).await?),
            None => Ok(Deduplicator::new()),
        }
    }

    /// Filtered results go through the deduplicator, then one notification batch
    async fn evaluate(&mut self, dedup: &Deduplicator, discoveries: Vec<Discovery>) -> usize {
        let admission = dedup.admit(discoveries).await;
        self.session.seen_count = dedup.seen_count().await;

        if let Some(e) = admission.store_error {
            error!("Failed to persist new matches: {}", e);
            self.session.last_error = Some(e.to_string());
        }

        let admitted = admission.fresh.len();
        if admitted == 0 {
            return 0;
        }

        let matches: Vec<AvailableCampsite> =
            admission.fresh.iter().map(|d| d.campsite.clone()).collect();
        for site in &matches {
            info!(
                "New match: site {} ({}) at campground {} for {}",
                site.site_name, site.campsite_id, site.campground_id, site.stay_window
            );
        }

        let outcomes = self.notifier.dispatch(&matches).await;
        // with no channels the log line above is the delivery
        let delivered = outcomes.is_empty() || outcomes.iter().any(|o| o.is_delivered());
        if let Some(failed) = outcomes.into_iter().filter_map(|o| o.result.err()).last() {
            self.session.last_error = Some(failed.to_string());
        }

        if delivered {
            if let Err(e) = dedup.confirm_delivered(&admission.fresh).await {
                error!("Failed to record delivered matches: {}", e);
                self.session.last_error = Some(e.to_string());
            }
        } else {
            warn!(
                "No channel delivered {} matches; they stay pending in the seen-store",
                admitted
            );
        }

        self.session.matches_notified += admitted as u64;
        admitted
    }

    fn next_sleep(&self, stats: &CycleStats) -> Duration {
        let mut pause = self.constraints.polling_interval;

        if stats.all_failed()
            && self.session.consecutive_failures >= self.config.failure_warning_threshold
        {
            pause = pause.max(self.config.error_backoff);
        }

        let jitter_ms = u64::try_from(self.config.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms > 0 {
            let jitter = Duration::from_millis(rand::rng().random_range(0..=jitter_ms));
            pause = pause.saturating_add(jitter);
        }

        pause
    }

    fn transition(&mut self, next: SchedulerState) {
        if self.state != next {
            debug!("Session {}: {:?} -> {:?}", self.session.id, self.state, next);
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{NotificationError, ProviderError};
    use crate::notification_service::NotificationChannel;
    use crate::seen_store::{MemorySeenStore, SeenEntry};
    use chrono::NaiveDate;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Responder =
        dyn Fn(&str, usize) -> Result<Vec<AvailableCampsite>, ProviderError> + Send + Sync;
    type Delay = dyn Fn(&str) -> Duration + Send + Sync;

    // Mock provider for testing
    struct ScriptedProvider {
        id: String,
        listing: Result<Vec<String>, ProviderError>,
        respond: Box<Responder>,
        delay: Box<Delay>,
        calls: Mutex<Vec<String>>,
        counter: AtomicUsize,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(
            id: &str,
            respond: impl Fn(&str, usize) -> Result<Vec<AvailableCampsite>, ProviderError>
            + Send
            + Sync
            + 'static,
        ) -> Self {
            Self {
                id: id.to_string(),
                listing: Err(ProviderError::Unavailable("no listing".to_string())),
                respond: Box::new(respond),
                delay: Box::new(|_| Duration::ZERO),
                calls: Mutex::new(Vec::new()),
                counter: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }
        }

        // each query takes `delay(campground_id)` before answering
        fn delayed(mut self, delay: impl Fn(&str) -> Duration + Send + Sync + 'static) -> Self {
            self.delay = Box::new(delay);
            self
        }

        fn peak_in_flight(&self) -> usize {
            self.peak_in_flight.load(Ordering::SeqCst)
        }

        fn listing(mut self, ids: &[&str]) -> Self {
            self.listing = Ok(ids.iter().map(|id| id.to_string()).collect());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl CampsiteProvider for ScriptedProvider {
        fn provider_id(&self) -> &str {
            &self.id
        }

        async fn list_campgrounds(&self) -> Result<Vec<Campground>, ProviderError> {
            self.listing.clone().map(|ids| {
                ids.into_iter()
                    .map(|id| Campground {
                        facility_name: format!("Campground {}", id),
                        facility_id: id,
                    })
                    .collect()
            })
        }

        async fn query(
            &self,
            campground_id: &str,
            _stay_window: &StayWindow,
        ) -> Result<Vec<AvailableCampsite>, ProviderError> {
            self.calls.lock().unwrap().push(campground_id.to_string());
            let call = self.counter.fetch_add(1, Ordering::SeqCst);

            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
            let delay = (self.delay)(campground_id);
            if !delay.is_zero() {
                sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            (self.respond)(campground_id, call)
        }
    }

    // Mock channel recording each batch it receives
    #[derive(Default)]
    struct RecordingChannel {
        batches: Mutex<Vec<Vec<String>>>,
    }

    impl RecordingChannel {
        fn batches(&self) -> Vec<Vec<String>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn notify(&self, matches: &[AvailableCampsite]) -> Result<(), NotificationError> {
            self.batches
                .lock()
                .unwrap()
                .push(matches.iter().map(|m| m.campsite_id.clone()).collect());
            Ok(())
        }
    }

    struct FailingChannel;

    #[async_trait::async_trait]
    impl NotificationChannel for FailingChannel {
        fn name(&self) -> &str {
            "failing"
        }

        async fn notify(&self, _matches: &[AvailableCampsite]) -> Result<(), NotificationError> {
            Err(NotificationError::DeliveryFailed {
                channel: "failing".to_string(),
                reason: "smtp down".to_string(),
            })
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, day).unwrap()
    }

    // one campground and a range holding exactly one two-night window
    fn constraints(mode: SearchMode, campgrounds: &[&str]) -> SearchConstraints {
        SearchConstraints {
            campground_ids: campgrounds.iter().map(|id| id.to_string()).collect(),
            date_range: DateRange::new(date(1), date(3)),
            nights: Some(NightsSpec::Fixed(2)),
            weekends_only: false,
            day_of_week: None,
            equipment: None,
            polling_interval: Duration::from_secs(300),
            mode,
            offline: false,
        }
    }

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            max_jitter: Duration::ZERO,
            ..MonitorConfig::default()
        }
    }

    fn site(campground_id: &str, campsite_id: &str) -> AvailableCampsite {
        AvailableCampsite {
            campsite_id: campsite_id.to_string(),
            campground_id: campground_id.to_string(),
            site_name: format!("Site {}", campsite_id),
            site_type: "Tent".to_string(),
            stay_window: StayWindow::new(date(1), 2).unwrap(),
            price: Some(35.0),
            capacity: Some(6),
            site_length: None,
            coordinates: None,
            booking_url: None,
        }
    }

    fn scheduler(
        constraints: SearchConstraints,
        providers: &[Arc<ScriptedProvider>],
        channel: Arc<dyn NotificationChannel>,
        store: Option<Arc<dyn SeenStore>>,
    ) -> MonitoringScheduler {
        scheduler_with_config(constraints, providers, channel, store, test_config())
    }

    fn scheduler_with_config(
        constraints: SearchConstraints,
        providers: &[Arc<ScriptedProvider>],
        channel: Arc<dyn NotificationChannel>,
        store: Option<Arc<dyn SeenStore>>,
        config: MonitorConfig,
    ) -> MonitoringScheduler {
        let providers: Vec<Arc<dyn CampsiteProvider>> = providers
            .iter()
            .map(|p| p.clone() as Arc<dyn CampsiteProvider>)
            .collect();

        MonitoringScheduler::new(
            constraints,
            providers,
            Notifier::new(vec![channel]),
            store,
            Some(config),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_once_completes_after_one_cycle() {
        let provider = Arc::new(ScriptedProvider::new("camava", |_, _| Ok(vec![])));
        let channel = Arc::new(RecordingChannel::default());

        let mut monitor = scheduler(
            constraints(SearchMode::RunOnce, &["2"]),
            &[provider.clone()],
            channel.clone(),
            None,
        );

        assert_eq!(monitor.state(), SchedulerState::Idle);
        assert_eq!(monitor.run().await, TerminationReason::Completed);
        assert_eq!(
            monitor.state(),
            SchedulerState::Terminated(TerminationReason::Completed)
        );
        assert_eq!(monitor.session().cycle_count, 1);
        assert_eq!(provider.calls(), vec!["2"]);
        assert!(channel.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_match_stops_on_first_match() {
        let provider = Arc::new(ScriptedProvider::new("camava", |campground, call| {
            if call == 2 {
                Ok(vec![site(campground, "17")])
            } else {
                Ok(vec![])
            }
        }));
        let channel = Arc::new(RecordingChannel::default());

        let mut monitor = scheduler(
            constraints(SearchMode::RunUntilMatch, &["2"]),
            &[provider.clone()],
            channel.clone(),
            None,
        );

        assert_eq!(monitor.run().await, TerminationReason::Matched);
        assert_eq!(monitor.session().cycle_count, 3);
        assert_eq!(monitor.session().matches_notified, 1);
        assert_eq!(channel.batches(), vec![vec!["17".to_string()]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_match_is_notified_once() {
        let token = CancellationToken::new();
        let stop = token.clone();
        let provider = Arc::new(ScriptedProvider::new("camava", move |campground, call| {
            if call == 3 {
                stop.cancel();
            }
            Ok(vec![site(campground, "17")])
        }));
        let channel = Arc::new(RecordingChannel::default());

        let mut monitor = scheduler(
            constraints(SearchMode::RunForever, &["2"]),
            &[provider.clone()],
            channel.clone(),
            None,
        )
        .with_cancellation_token(token);

        assert_eq!(monitor.run().await, TerminationReason::Cancelled);
        assert_eq!(monitor.session().cycle_count, 4);
        assert_eq!(channel.batches(), vec![vec!["17".to_string()]]);
        assert_eq!(monitor.session().seen_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_failure_does_not_block_other_campgrounds() {
        let provider = Arc::new(ScriptedProvider::new("camava", |campground, _| {
            if campground == "1" {
                Err(ProviderError::Unavailable("connection reset".to_string()))
            } else {
                Ok(vec![site(campground, "40")])
            }
        }));
        let channel = Arc::new(RecordingChannel::default());

        let mut monitor = scheduler(
            constraints(SearchMode::RunOnce, &["1", "2"]),
            &[provider.clone()],
            channel.clone(),
            None,
        );

        assert_eq!(monitor.run().await, TerminationReason::Completed);
        assert_eq!(channel.batches(), vec![vec!["40".to_string()]]);
        assert!(
            monitor
                .session()
                .last_error
                .as_deref()
                .is_some_and(|e| e.contains("connection reset"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_once_with_every_query_failing_is_an_error() {
        let provider = Arc::new(ScriptedProvider::new("camava", |_, _| {
            Err(ProviderError::Rejected("HTTP 403".to_string()))
        }));
        let channel = Arc::new(RecordingChannel::default());

        let mut monitor = scheduler(
            constraints(SearchMode::RunOnce, &["2"]),
            &[provider],
            channel,
            None,
        );

        assert_eq!(monitor.run().await, TerminationReason::Error);
        assert_eq!(monitor.session().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_sleep() {
        let provider = Arc::new(ScriptedProvider::new("camava", |_, _| Ok(vec![])));
        let channel = Arc::new(RecordingChannel::default());

        let mut monitor = scheduler(
            constraints(SearchMode::RunForever, &["2"]),
            &[provider.clone()],
            channel,
            None,
        );

        let token = monitor.cancellation_token();
        tokio::spawn(async move {
            sleep(Duration::from_secs(60)).await;
            token.cancel();
        });

        assert_eq!(monitor.run().await, TerminationReason::Cancelled);
        assert_eq!(monitor.session().cycle_count, 1);
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_routes_campgrounds_to_providers() {
        let listed =
            Arc::new(ScriptedProvider::new("listed", |_, _| Ok(vec![])).listing(&["1"]));
        let unlisted = Arc::new(ScriptedProvider::new("unlisted", |_, _| Ok(vec![])));
        let channel = Arc::new(RecordingChannel::default());

        let mut monitor = scheduler(
            constraints(SearchMode::RunOnce, &["1", "2", "1"]),
            &[listed.clone(), unlisted.clone()],
            channel,
            None,
        );

        assert_eq!(monitor.run().await, TerminationReason::Completed);
        assert_eq!(listed.calls(), vec!["1"]);

        let mut fallback = unlisted.calls();
        fallback.sort();
        assert_eq!(fallback, vec!["1", "2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_provider_serving_any_campground_is_an_error() {
        let provider =
            Arc::new(ScriptedProvider::new("camava", |_, _| Ok(vec![])).listing(&["9"]));
        let channel = Arc::new(RecordingChannel::default());

        let mut monitor = scheduler(
            constraints(SearchMode::RunForever, &["2"]),
            &[provider.clone()],
            channel,
            None,
        );

        assert_eq!(monitor.run().await, TerminationReason::Error);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_configuration_is_rejected() {
        let provider: Arc<dyn CampsiteProvider> =
            Arc::new(ScriptedProvider::new("camava", |_, _| Ok(vec![])));

        let mut offline = constraints(SearchMode::RunOnce, &["2"]);
        offline.offline = true;
        assert!(matches!(
            MonitoringScheduler::new(
                offline,
                vec![provider.clone()],
                Notifier::default(),
                None,
                None
            ),
            Err(MonitorError::ConfigurationInvalid(_))
        ));

        assert!(matches!(
            MonitoringScheduler::new(
                constraints(SearchMode::RunOnce, &["2"]),
                vec![],
                Notifier::default(),
                None,
                None
            ),
            Err(MonitorError::ConfigurationInvalid(_))
        ));

        let mut too_fast = constraints(SearchMode::RunOnce, &["2"]);
        too_fast.polling_interval = Duration::from_secs(10);
        assert!(
            MonitoringScheduler::new(too_fast, vec![provider], Notifier::default(), None, None)
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_search_suppresses_matches_across_restarts() {
        let store = MemorySeenStore::new();
        let mut offline = constraints(SearchMode::RunOnce, &["2"]);
        offline.offline = true;

        for expected in [vec![vec!["17".to_string()]], vec![]] {
            let provider = Arc::new(ScriptedProvider::new("camava", |campground, _| {
                Ok(vec![site(campground, "17")])
            }));
            let channel = Arc::new(RecordingChannel::default());

            let mut monitor = scheduler(
                offline.clone(),
                &[provider],
                channel.clone(),
                Some(Arc::new(store.clone())),
            );

            assert_eq!(monitor.run().await, TerminationReason::Completed);
            assert_eq!(channel.batches(), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_persisted_but_unnotified_match_is_notified_after_restart() {
        let store = MemorySeenStore::new();
        let pending = site("2", "23");
        store
            .append(&[SeenEntry::admitted(MatchKey::new("camava", &pending), pending)])
            .await
            .unwrap();

        let mut offline = constraints(SearchMode::RunOnce, &["2"]);
        offline.offline = true;

        let provider = Arc::new(ScriptedProvider::new("camava", |_, _| Ok(vec![])));
        let channel = Arc::new(RecordingChannel::default());
        let mut monitor = scheduler(
            offline.clone(),
            &[provider],
            channel.clone(),
            Some(Arc::new(store.clone())),
        );

        assert_eq!(monitor.run().await, TerminationReason::Completed);
        assert_eq!(channel.batches(), vec![vec!["23".to_string()]]);

        // delivery was confirmed, so a further restart stays quiet
        let provider = Arc::new(ScriptedProvider::new("camava", |_, _| Ok(vec![])));
        let channel = Arc::new(RecordingChannel::default());
        let mut monitor = scheduler(
            offline,
            &[provider],
            channel.clone(),
            Some(Arc::new(store)),
        );

        assert_eq!(monitor.run().await, TerminationReason::Completed);
        assert!(channel.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_undelivered_match_stays_pending() {
        let store = MemorySeenStore::new();
        let mut offline = constraints(SearchMode::RunOnce, &["2"]);
        offline.offline = true;

        let provider = Arc::new(ScriptedProvider::new("camava", |campground, _| {
            Ok(vec![site(campground, "31")])
        }));
        let mut monitor = scheduler(
            offline.clone(),
            &[provider],
            Arc::new(FailingChannel),
            Some(Arc::new(store.clone())),
        );

        assert_eq!(monitor.run().await, TerminationReason::Completed);
        assert_eq!(monitor.session().matches_notified, 1);
        assert!(
            monitor
                .session()
                .last_error
                .as_deref()
                .is_some_and(|e| e.contains("smtp down"))
        );

        let provider = Arc::new(ScriptedProvider::new("camava", |_, _| Ok(vec![])));
        let channel = Arc::new(RecordingChannel::default());
        let mut monitor = scheduler(
            offline,
            &[provider],
            channel.clone(),
            Some(Arc::new(store)),
        );

        assert_eq!(monitor.run().await, TerminationReason::Completed);
        assert_eq!(channel.batches(), vec![vec!["31".to_string()]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_provider_calls_start_after_cancellation() {
        let token = CancellationToken::new();
        let stop = token.clone();
        let provider = Arc::new(ScriptedProvider::new("camava", move |_, _| {
            stop.cancel();
            Ok(vec![])
        }));
        let channel = Arc::new(RecordingChannel::default());

        // 18 two-night windows
        let mut long_range = constraints(SearchMode::RunForever, &["2"]);
        long_range.date_range = DateRange::new(date(1), date(20));

        let mut monitor = scheduler_with_config(
            long_range,
            &[provider.clone()],
            channel.clone(),
            None,
            MonitorConfig {
                max_concurrent_queries: 1,
                ..test_config()
            },
        )
        .with_cancellation_token(token);

        assert_eq!(monitor.run().await, TerminationReason::Cancelled);
        assert_eq!(provider.calls().len(), 1);
        assert_eq!(monitor.session().cycle_count, 1);
        assert!(channel.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_call_times_out_without_stopping_the_cycle() {
        let provider = Arc::new(
            ScriptedProvider::new("camava", |campground, _| Ok(vec![site(campground, "40")]))
                .delayed(|campground| {
                    if campground == "1" {
                        Duration::from_secs(120)
                    } else {
                        Duration::ZERO
                    }
                }),
        );
        let channel = Arc::new(RecordingChannel::default());

        let mut monitor = scheduler(
            constraints(SearchMode::RunOnce, &["1", "2"]),
            &[provider.clone()],
            channel.clone(),
            None,
        );

        assert_eq!(monitor.run().await, TerminationReason::Completed);
        assert_eq!(channel.batches(), vec![vec!["40".to_string()]]);
        assert!(
            monitor
                .session()
                .last_error
                .as_deref()
                .is_some_and(|e| e.contains("timed out"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_queries_in_flight_never_exceed_the_limit() {
        let provider = Arc::new(
            ScriptedProvider::new("camava", |_, _| Ok(vec![]))
                .delayed(|_| Duration::from_secs(1)),
        );
        let channel = Arc::new(RecordingChannel::default());

        // 8 two-night windows
        let mut range = constraints(SearchMode::RunOnce, &["2"]);
        range.date_range = DateRange::new(date(1), date(10));

        let mut monitor = scheduler_with_config(
            range,
            &[provider.clone()],
            channel,
            None,
            MonitorConfig {
                max_concurrent_queries: 2,
                ..test_config()
            },
        );

        assert_eq!(monitor.run().await, TerminationReason::Completed);
        assert_eq!(provider.calls().len(), 8);
        assert_eq!(provider.peak_in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failed_cycles_back_off() {
        let provider = Arc::new(ScriptedProvider::new("camava", |_, _| {
            Err(ProviderError::Unavailable("HTTP 503".to_string()))
        }));
        let channel = Arc::new(RecordingChannel::default());

        let mut monitor = scheduler_with_config(
            constraints(SearchMode::RunForever, &["2"]),
            &[provider.clone()],
            channel,
            None,
            MonitorConfig {
                failure_warning_threshold: 2,
                ..test_config()
            },
        );

        // cycles at 0s and 300s; the second reaches the threshold, so the
        // third waits for the 30 minute backoff instead of another 300s
        let token = monitor.cancellation_token();
        tokio::spawn(async move {
            sleep(Duration::from_secs(2000)).await;
            token.cancel();
        });

        assert_eq!(monitor.run().await, TerminationReason::Cancelled);
        assert_eq!(provider.calls().len(), 2);
        assert_eq!(monitor.session().consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_sleep_uses_backoff_only_after_whole_cycle_failures() {
        let provider = Arc::new(ScriptedProvider::new("camava", |_, _| Ok(vec![])));
        let channel = Arc::new(RecordingChannel::default());
        let mut monitor = scheduler_with_config(
            constraints(SearchMode::RunForever, &["2"]),
            &[provider],
            channel,
            None,
            MonitorConfig {
                failure_warning_threshold: 3,
                ..test_config()
            },
        );

        let failed = CycleStats {
            queries: 2,
            failures: 2,
            ..CycleStats::default()
        };
        let partial = CycleStats {
            queries: 2,
            failures: 1,
            ..CycleStats::default()
        };

        monitor.session.consecutive_failures = 2;
        assert_eq!(monitor.next_sleep(&failed), Duration::from_secs(300));

        monitor.session.consecutive_failures = 3;
        assert_eq!(monitor.next_sleep(&failed), Duration::from_secs(30 * 60));
        assert_eq!(monitor.next_sleep(&partial), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_longest_polling_interval_saturates_instead_of_overflowing() {
        let provider = Arc::new(ScriptedProvider::new("camava", |_, _| Ok(vec![])));
        let channel = Arc::new(RecordingChannel::default());
        let mut forever = constraints(SearchMode::RunForever, &["2"]);
        forever.polling_interval = Duration::MAX;

        let monitor = scheduler_with_config(
            forever,
            &[provider],
            channel,
            None,
            MonitorConfig::default(),
        );

        let stats = CycleStats {
            queries: 1,
            failures: 1,
            ..CycleStats::default()
        };
        assert_eq!(monitor.next_sleep(&stats), Duration::MAX);
        assert_eq!(monitor.next_sleep(&CycleStats::default()), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_longest_sleep() {
        let provider = Arc::new(ScriptedProvider::new("camava", |_, _| Ok(vec![])));
        let channel = Arc::new(RecordingChannel::default());
        let mut forever = constraints(SearchMode::RunForever, &["2"]);
        forever.polling_interval = Duration::MAX;

        let mut monitor = scheduler_with_config(
            forever,
            &[provider.clone()],
            channel,
            None,
            MonitorConfig::default(),
        );

        let token = monitor.cancellation_token();
        tokio::spawn(async move {
            sleep(Duration::from_secs(60)).await;
            token.cancel();
        });

        assert_eq!(monitor.run().await, TerminationReason::Cancelled);
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_outside_the_constraints_are_not_notified() {
        let provider = Arc::new(ScriptedProvider::new("camava", |campground, _| {
            let mut one_night = site(campground, "12");
            one_night.stay_window = StayWindow::new(date(1), 1).unwrap();
            Ok(vec![one_night, site(campground, "17")])
        }));
        let channel = Arc::new(RecordingChannel::default());

        let mut monitor = scheduler(
            constraints(SearchMode::RunOnce, &["2"]),
            &[provider],
            channel.clone(),
            None,
        );

        assert_eq!(monitor.run().await, TerminationReason::Completed);
        assert_eq!(channel.batches(), vec![vec!["17".to_string()]]);
        assert_eq!(monitor.session().seen_count, 1);
    }
}
