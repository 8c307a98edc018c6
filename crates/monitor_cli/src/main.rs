//! Command-line entry point for the campsite monitor.
//! Reads a search from the environment and watches Camava for openings.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use camava::{CamavaConfig, CamavaProvider};
use campsite_monitor::*;
use notification_channels::{LogChannel, WebhookChannel};
use pg_seen_store::PgSeenStore;
use pg_seen_store::database::{create_connection_pool, test_connection};

mod settings;
use settings::{SeenStoreSetting, Settings};

async fn open_seen_store(setting: &SeenStoreSetting) -> Result<Option<Arc<dyn SeenStore>>> {
    match setting {
        SeenStoreSetting::Disabled => Ok(None),
        SeenStoreSetting::JsonLines(path) => {
            let store = JsonLinesSeenStore::create(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            log::info!("🗃️ Offline search file: {}", store.path().display());
            let store: Arc<dyn SeenStore> = Arc::new(store);
            Ok(Some(store))
        }
        SeenStoreSetting::Postgres {
            database_url,
            namespace,
        } => {
            let pool = create_connection_pool(database_url).await?;
            test_connection(&pool).await?;
            let store = PgSeenStore::create(pool, namespace).await?;
            log::info!("🗃️ Offline search namespace: {}", store.namespace());
            let store: Arc<dyn SeenStore> = Arc::new(store);
            Ok(Some(store))
        }
    }
}

fn build_notifier(settings: &Settings) -> Result<Notifier> {
    let mut notifier = Notifier::default().with_channel(Arc::new(LogChannel::new()));

    if let Some(url) = &settings.webhook_url {
        let webhook = WebhookChannel::new(url, Duration::from_secs(30))?;
        log::info!("📣 Posting matches to {}", url);
        notifier = notifier.with_channel(Arc::new(webhook));
    }

    Ok(notifier)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    log::info!("🚀 Starting campsite monitor...");

    let settings = Settings::from_env().context("Invalid configuration")?;

    let camava_config = match &settings.camava_base_url {
        Some(base_url) => CamavaConfig::for_site(base_url, "camava", "Camava Parks"),
        None => CamavaConfig::default(),
    };
    log::info!("🏕️ Searching {} ({})", camava_config.park_name, camava_config.base_url);
    let provider: Arc<dyn CampsiteProvider> =
        Arc::new(CamavaProvider::new(Some(camava_config))?);

    let seen_store = open_seen_store(&settings.seen_store).await?;
    let notifier = build_notifier(&settings)?;

    let mut monitor = MonitoringScheduler::new(
        settings.constraints.clone(),
        vec![provider],
        notifier,
        seen_store,
        None,
    )?;

    if let Some(interval) = settings.min_api_interval {
        monitor = monitor.with_rate_limiter(Arc::new(RateLimiter::new(interval)));
    }

    let token = monitor.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("🛑 Interrupted, stopping after the current step");
            token.cancel();
        }
    });

    let reason = monitor.run().await;
    let session = monitor.session();

    log::info!(
        "🏁 Session {} ended ({}): {} cycles, {} matches notified",
        session.id,
        reason,
        session.cycle_count,
        session.matches_notified
    );

    if reason == TerminationReason::Error {
        anyhow::bail!(
            "Monitoring failed: {}",
            session.last_error.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(())
}
