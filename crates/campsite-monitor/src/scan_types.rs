use std::fmt;
use std::time::Duration;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::MonitorError;

/// Upper bound on the length of a single stay, in nights
pub const MAX_NIGHTS: u32 = 365;

/// A candidate arrival date plus a length of stay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StayWindow {
    arrival: NaiveDate,
    nights: u32,
}

impl StayWindow {
    /// Create a stay window, rejecting zero-night stays and dates past the calendar range
    pub fn new(arrival: NaiveDate, nights: u32) -> Result<Self, MonitorError> {
        if nights == 0 {
            return Err(MonitorError::ConfigurationInvalid(
                "a stay must be at least one night".to_string(),
            ));
        }

        arrival
            .checked_add_days(Days::new(u64::from(nights)))
            .ok_or_else(|| {
                MonitorError::ConfigurationInvalid(format!(
                    "stay of {} nights from {} overflows the calendar",
                    nights, arrival
                ))
            })?;

        Ok(Self { arrival, nights })
    }

    /// Arrival (check-in) date
    pub fn arrival(&self) -> NaiveDate {
        self.arrival
    }

    /// Number of nights
    pub fn nights(&self) -> u32 {
        self.nights
    }

    /// Departure (check-out) date, always after arrival
    pub fn departure(&self) -> NaiveDate {
        // checked in `new`
        self.arrival + Days::new(u64::from(self.nights))
    }

    /// The dates of each night of the stay: `[arrival, departure)`
    pub fn night_dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.arrival.iter_days().take(self.nights as usize)
    }

    /// Whether any night of the stay falls on a Friday or Saturday
    pub fn includes_weekend_night(&self) -> bool {
        self.night_dates()
            .any(|d| matches!(d.weekday(), Weekday::Fri | Weekday::Sat))
    }
}

impl fmt::Display for StayWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to {} ({} nights)",
            self.arrival,
            self.departure(),
            self.nights
        )
    }
}

/// Inclusive range of dates a search covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First possible arrival date
    pub start: NaiveDate,
    /// Last possible departure date
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a date range
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Whether the stay lies entirely within the range
    pub fn contains(&self, window: &StayWindow) -> bool {
        window.arrival() >= self.start && window.departure() <= self.end
    }
}

/// Length-of-stay constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NightsSpec {
    /// Exactly this many nights
    Fixed(u32),
    /// Any length between `min` and `max` nights, inclusive
    Range {
        /// Shortest acceptable stay
        min: u32,
        /// Longest acceptable stay
        max: u32,
    },
}

impl NightsSpec {
    /// Shortest and longest stay, inclusive
    pub fn bounds(&self) -> (u32, u32) {
        match *self {
            NightsSpec::Fixed(n) => (n, n),
            NightsSpec::Range { min, max } => (min, max),
        }
    }

    /// Whether a stay of `nights` satisfies this constraint
    pub fn allows(&self, nights: u32) -> bool {
        let (min, max) = self.bounds();
        nights >= min && nights <= max
    }
}

impl Default for NightsSpec {
    fn default() -> Self {
        NightsSpec::Fixed(1)
    }
}

/// Kind of equipment the camper brings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentKind {
    /// Tent camping
    Tent,
    /// Motorhome / RV
    Rv,
    /// Towed trailer
    Trailer,
}

impl std::str::FromStr for EquipmentKind {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tent" => Ok(EquipmentKind::Tent),
            "rv" | "motorhome" => Ok(EquipmentKind::Rv),
            "trailer" => Ok(EquipmentKind::Trailer),
            other => Err(MonitorError::ConfigurationInvalid(format!(
                "unknown equipment kind: {}",
                other
            ))),
        }
    }
}

/// Equipment filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    /// What the camper brings
    pub kind: EquipmentKind,
    /// Minimum site length in feet, when the equipment needs one
    pub min_length: Option<u32>,
}

/// When the monitoring loop stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Exactly one polling cycle
    RunOnce,
    /// Keep polling until a cycle admits at least one new match
    RunUntilMatch,
    /// Keep polling until cancelled
    RunForever,
}

impl std::str::FromStr for SearchMode {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" | "run-once" => Ok(SearchMode::RunOnce),
            "until-match" | "run-until-match" => Ok(SearchMode::RunUntilMatch),
            "forever" | "run-forever" | "continuous" => Ok(SearchMode::RunForever),
            other => Err(MonitorError::ConfigurationInvalid(format!(
                "unknown search mode: {}",
                other
            ))),
        }
    }
}

/// Everything a user asks the monitor to look for
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SearchConstraints {
    /// Campgrounds to watch (provider-scoped opaque ids)
    #[validate(length(min = 1, message = "At least one campground ID is required"))]
    pub campground_ids: Vec<String>,

    /// Dates the stays must fall within
    pub date_range: DateRange,

    /// Length of stay; one night when absent
    pub nights: Option<NightsSpec>,

    /// Only stays that include a Friday or Saturday night
    pub weekends_only: bool,

    /// Only stays arriving on this weekday
    pub day_of_week: Option<Weekday>,

    /// Equipment the site must accommodate
    pub equipment: Option<Equipment>,

    /// Time between polling cycles
    pub polling_interval: Duration,

    /// When to stop
    pub mode: SearchMode,

    /// Persist seen matches across restarts
    pub offline: bool,
}

impl SearchConstraints {
    /// Nights constraint with the single-night default applied
    pub fn nights_spec(&self) -> NightsSpec {
        self.nights.unwrap_or_default()
    }

    /// Campground ids with duplicates removed, first occurrence kept
    pub fn unique_campground_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::with_capacity(self.campground_ids.len());
        for id in &self.campground_ids {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}

/// A campground a provider can be queried for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campground {
    /// Provider-scoped facility id
    pub facility_id: String,
    /// Display name
    pub facility_name: String,
}

/// Latitude / longitude of a site
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
}

/// A campsite a provider reported as bookable for one stay window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableCampsite {
    /// Provider-scoped site id
    pub campsite_id: String,
    /// Campground the site belongs to
    pub campground_id: String,
    /// Display name, e.g. "Site 42"
    pub site_name: String,
    /// Provider's site type label, e.g. "RV" or "Tent"
    pub site_type: String,
    /// The stay the site is available for
    pub stay_window: StayWindow,
    /// Nightly price, when reported
    pub price: Option<f64>,
    /// Maximum occupancy, when reported
    pub capacity: Option<u32>,
    /// Maximum equipment length in feet, when reported
    pub site_length: Option<u32>,
    /// Location, when reported
    pub coordinates: Option<Coordinates>,
    /// Where to book, when the provider exposes one
    pub booking_url: Option<String>,
}

impl PartialEq for AvailableCampsite {
    fn eq(&self, other: &Self) -> bool {
        self.campsite_id == other.campsite_id && self.stay_window == other.stay_window
    }
}

impl Eq for AvailableCampsite {}

/// Identity of one discovery, used for deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchKey {
    /// Provider that reported the site
    pub provider_id: String,
    /// Campground of the site
    pub campground_id: String,
    /// Site id within the provider
    pub campsite_id: String,
    /// The stay
    pub stay_window: StayWindow,
}

impl MatchKey {
    /// Key of a site reported by `provider_id`
    pub fn new(provider_id: &str, site: &AvailableCampsite) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            campground_id: site.campground_id.clone(),
            campsite_id: site.campsite_id.clone(),
            stay_window: site.stay_window,
        }
    }
}

/// A filtered site tagged with the provider that reported it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    /// Provider that reported the site
    pub provider_id: String,
    /// The site
    pub campsite: AvailableCampsite,
}

impl Discovery {
    /// Deduplication key
    pub fn key(&self) -> MatchKey {
        MatchKey::new(&self.provider_id, &self.campsite)
    }
}

/// Stable serialized form of a match handed to notification backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Campground of the site
    pub campground_id: String,
    /// Site id within the provider
    pub campsite_id: String,
    /// Display name
    pub site_name: String,
    /// Site type label
    pub site_type: String,
    /// Arrival date
    pub arrival: NaiveDate,
    /// Length of stay
    pub nights: u32,
    /// Nightly price
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub price: Option<f64>,
    /// Maximum occupancy
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub capacity: Option<u32>,
    /// Where to book
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub booking_url: Option<String>,
}

impl From<&AvailableCampsite> for MatchRecord {
    fn from(site: &AvailableCampsite) -> Self {
        Self {
            campground_id: site.campground_id.clone(),
            campsite_id: site.campsite_id.clone(),
            site_name: site.site_name.clone(),
            site_type: site.site_type.clone(),
            arrival: site.stay_window.arrival(),
            nights: site.stay_window.nights(),
            price: site.price,
            capacity: site.capacity,
            booking_url: site.booking_url.clone(),
        }
    }
}

/// Why a monitoring session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// A run-once session finished its cycle
    Completed,
    /// A run-until-match session admitted a new match
    Matched,
    /// Cancelled from outside
    Cancelled,
    /// Startup failed, or a run-once cycle could not query any provider
    Error,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            TerminationReason::Completed => "completed",
            TerminationReason::Matched => "matched",
            TerminationReason::Cancelled => "cancelled",
            TerminationReason::Error => "error",
        };
        f.write_str(reason)
    }
}
