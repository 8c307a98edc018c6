use std::time::Duration;

use async_trait::async_trait;
use campsite_monitor::{AvailableCampsite, Campground, CampsiteProvider, ProviderError, StayWindow};
use reqwest::{Client, Response, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::page_parser::{parse_available_sites, parse_campgrounds};

/// Settings for one Camava-hosted reservation system
#[derive(Debug, Clone)]
pub struct CamavaConfig {
    /// Site root, e.g. `https://santabarbara.camava.com`
    pub base_url: String,

    /// Identifier used in match keys
    pub provider_id: String,

    /// Display name of the park system
    pub park_name: String,

    /// Path of the reservation page, relative to `base_url`
    pub reservation_path: String,

    /// Per-request HTTP timeout (default: 30 seconds)
    pub request_timeout: Duration,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for CamavaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://santabarbara.camava.com".to_string(),
            provider_id: "camava-santabarbara".to_string(),
            park_name: "Santa Barbara County Parks".to_string(),
            reservation_path: "/reservation/camping/index.asp".to_string(),
            request_timeout: Duration::from_secs(30),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36".to_string(),
        }
    }
}

impl CamavaConfig {
    /// Config for another Camava deployment
    pub fn for_site(base_url: &str, provider_id: &str, park_name: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            provider_id: provider_id.to_string(),
            park_name: park_name.to_string(),
            ..Self::default()
        }
    }

    /// Full URL of the reservation page
    pub fn reservation_url(&self) -> String {
        format!("{}{}", self.base_url, self.reservation_path)
    }
}

/// Provider for Camava ASP reservation sites
///
/// Camava needs no login: each search opens a fresh cookie session with a
/// GET of the reservation page, then posts the search form. Responses are
/// HTML that list only the sites that are bookable.
pub struct CamavaProvider {
    config: CamavaConfig,
    client: Client,
    campground_cache: RwLock<Option<Vec<Campground>>>,
}

impl CamavaProvider {
    /// Create a new Camava provider
    pub fn new(config: Option<CamavaConfig>) -> Result<Self, ProviderError> {
        let config = config.unwrap_or_default();
        let client = build_client(&config, false)?;

        Ok(Self {
            config,
            client,
            campground_cache: RwLock::new(None),
        })
    }

    /// Provider settings
    pub fn config(&self) -> &CamavaConfig {
        &self.config
    }

    /// Fetch a page, mapping HTTP failures onto provider errors
    async fn fetch_page(&self, client: &Client) -> Result<String, ProviderError> {
        let response = client
            .get(self.config.reservation_url())
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("HTTP request failed: {}", e)))?;

        read_body(response).await
    }

    async fn search(
        &self,
        campground_id: &str,
        stay_window: &StayWindow,
    ) -> Result<String, ProviderError> {
        let url = self.config.reservation_url();

        // Fresh cookie jar per search
        let session = build_client(&self.config, true)?;

        debug!("Getting session from {}", url);
        self.fetch_page(&session).await?;

        let form = search_form(campground_id, stay_window);

        debug!("Posting search to {}", url);
        let response = session
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("Search request failed: {}", e)))?;

        let body = read_body(response).await?;
        debug!("Got response: {} chars", body.len());
        Ok(body)
    }
}

fn build_client(config: &CamavaConfig, cookies: bool) -> Result<Client, ProviderError> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .cookie_store(cookies)
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| ProviderError::Unavailable(format!("Failed to create HTTP client: {}", e)))
}

/// Map a response status onto the provider error taxonomy
fn status_error(status: StatusCode) -> ProviderError {
    match status.as_u16() {
        429 => ProviderError::Unavailable("rate limited (HTTP 429)".to_string()),
        500..=599 => ProviderError::Unavailable(format!("HTTP {}", status)),
        _ => ProviderError::Rejected(format!("HTTP {}", status)),
    }
}

async fn read_body(response: Response) -> Result<String, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        warn!("Camava request failed with status {}", status);
        return Err(status_error(status));
    }

    response
        .text()
        .await
        .map_err(|e| ProviderError::MalformedResponse(format!("Failed to read response: {}", e)))
}

/// Form fields of a Camava availability search
fn search_form(campground_id: &str, stay_window: &StayWindow) -> Vec<(&'static str, String)> {
    vec![
        ("reserve_type", "camping".to_string()),
        ("parent_idno", campground_id.to_string()),
        // 1/10/2026 format
        ("arrive_date", stay_window.arrival().format("%-m/%-d/%Y").to_string()),
        ("res_length", stay_window.nights().to_string()),
        // 01/12/2026 format
        ("depart_date", stay_window.departure().format("%m/%d/%Y").to_string()),
        ("rv_length", "0".to_string()),
        ("rv_width", "0".to_string()),
        ("site_type_idno", String::new()),
        ("max_consecutive_nights", "14".to_string()),
        ("min_consecutive_nights", "1".to_string()),
    ]
}

#[async_trait]
impl CampsiteProvider for CamavaProvider {
    fn provider_id(&self) -> &str {
        &self.config.provider_id
    }

    async fn list_campgrounds(&self) -> Result<Vec<Campground>, ProviderError> {
        if let Some(cached) = self.campground_cache.read().await.as_ref() {
            return Ok(cached.clone());
        }

        info!("Fetching available campgrounds from {}", self.config.base_url);

        let page = self.fetch_page(&self.client).await?;
        let campgrounds = parse_campgrounds(&page)?;

        if campgrounds.is_empty() {
            warn!("No campgrounds found on {}", self.config.reservation_url());
        } else {
            info!(
                "{} lists {} campgrounds",
                self.config.park_name,
                campgrounds.len()
            );
        }

        *self.campground_cache.write().await = Some(campgrounds.clone());
        Ok(campgrounds)
    }

    async fn query(
        &self,
        campground_id: &str,
        stay_window: &StayWindow,
    ) -> Result<Vec<AvailableCampsite>, ProviderError> {
        if campground_id.is_empty() || !campground_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ProviderError::Rejected(format!(
                "Camava campground ids are numeric, got {:?}",
                campground_id
            )));
        }

        debug!(
            "Searching {} campground {} for {}",
            self.config.park_name, campground_id, stay_window
        );

        let html = self.search(campground_id, stay_window).await?;
        let sites = parse_available_sites(
            &html,
            campground_id,
            stay_window,
            &self.config.reservation_url(),
        );

        debug!(
            "Found {} available campsites at campground {} for {}",
            sites.len(),
            campground_id,
            stay_window
        );
        Ok(sites)
    }
}
