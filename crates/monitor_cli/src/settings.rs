use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use campsite_monitor::{
    DateRange, Equipment, EquipmentKind, NightsSpec, SearchConstraints, SearchMode,
};
use chrono::{NaiveDate, Weekday};

/// Where offline searches keep their seen matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeenStoreSetting {
    /// Nothing is persisted
    Disabled,
    /// JSON-lines file
    JsonLines(PathBuf),
    /// PostgreSQL table, partitioned by namespace
    Postgres {
        /// Connection string
        database_url: String,
        /// Rows owned by this search
        namespace: String,
    },
}

/// Everything the binary reads from the environment
#[derive(Debug, Clone)]
pub struct Settings {
    /// What to search for
    pub constraints: SearchConstraints,
    /// Camava deployment to query; the Santa Barbara default when unset
    pub camava_base_url: Option<String>,
    /// Webhook to post matches to
    pub webhook_url: Option<String>,
    /// Seen-store for offline searches
    pub seen_store: SeenStoreSetting,
    /// Minimum spacing between calls to the backend
    pub min_api_interval: Option<Duration>,
}

const DEFAULT_OFFLINE_SEARCH_PATH: &str = "offline_search.jsonl";

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`, which returns a variable's value if set
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &str| var(name).with_context(|| format!("{} is not set", name));

        let campground_ids: Vec<String> = required("CAMPGROUND_IDS")?
            .split(',')
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();

        let start = parse_date("START_DATE", &required("START_DATE")?)?;
        let end = parse_date("END_DATE", &required("END_DATE")?)?;

        let nights = var("NIGHTS").map(|v| parse_nights(&v)).transpose()?;
        let weekends_only = var("WEEKENDS_ONLY")
            .map(|v| parse_bool("WEEKENDS_ONLY", &v))
            .transpose()?
            .unwrap_or(false);
        let day_of_week = var("DAY_OF_WEEK")
            .map(|v| {
                v.parse::<Weekday>()
                    .map_err(|_| anyhow::anyhow!("DAY_OF_WEEK: unknown weekday {:?}", v))
            })
            .transpose()?;
        let equipment = var("EQUIPMENT").map(|v| parse_equipment(&v)).transpose()?;

        let polling_minutes = var("POLL_INTERVAL_MINUTES")
            .map(|v| {
                v.parse::<u64>()
                    .with_context(|| format!("POLL_INTERVAL_MINUTES: not a number: {:?}", v))
            })
            .transpose()?
            .unwrap_or(10);
        let polling_secs = polling_minutes
            .checked_mul(60)
            .with_context(|| format!("POLL_INTERVAL_MINUTES: {} is too large", polling_minutes))?;

        let mode = match var("SEARCH_MODE") {
            Some(v) => v.parse::<SearchMode>()?,
            None => SearchMode::RunForever,
        };

        let offline = var("OFFLINE_SEARCH")
            .map(|v| parse_bool("OFFLINE_SEARCH", &v))
            .transpose()?
            .unwrap_or(false);

        let constraints = SearchConstraints {
            campground_ids,
            date_range: DateRange::new(start, end),
            nights,
            weekends_only,
            day_of_week,
            equipment,
            polling_interval: Duration::from_secs(polling_secs),
            mode,
            offline,
        };

        let seen_store = if !offline {
            SeenStoreSetting::Disabled
        } else {
            match var("SEEN_STORE").as_deref() {
                Some("postgres") => SeenStoreSetting::Postgres {
                    database_url: required("DATABASE_URL")?,
                    namespace: var("SEEN_STORE_NAMESPACE")
                        .unwrap_or_else(|| default_namespace(&constraints)),
                },
                Some("jsonl") | Some("file") | None => SeenStoreSetting::JsonLines(
                    var("OFFLINE_SEARCH_PATH")
                        .unwrap_or_else(|| DEFAULT_OFFLINE_SEARCH_PATH.to_string())
                        .into(),
                ),
                Some(other) => bail!("SEEN_STORE: unknown store {:?}", other),
            }
        };

        let min_api_interval = var("MIN_API_INTERVAL_SECS")
            .map(|v| {
                v.parse::<u64>()
                    .with_context(|| format!("MIN_API_INTERVAL_SECS: not a number: {:?}", v))
            })
            .transpose()?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            constraints,
            camava_base_url: var("CAMAVA_BASE_URL"),
            webhook_url: var("WEBHOOK_URL"),
            seen_store,
            min_api_interval,
        })
    }
}

fn parse_date(name: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("{}: expected YYYY-MM-DD, got {:?}", name, value))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("{}: expected true or false, got {:?}", name, value),
    }
}

/// `N` or `MIN-MAX`
fn parse_nights(value: &str) -> Result<NightsSpec> {
    let number = |s: &str| {
        s.trim()
            .parse::<u32>()
            .with_context(|| format!("NIGHTS: not a number: {:?}", s))
    };

    match value.split_once('-') {
        Some((min, max)) => Ok(NightsSpec::Range {
            min: number(min)?,
            max: number(max)?,
        }),
        None => Ok(NightsSpec::Fixed(number(value)?)),
    }
}

/// `kind[:min_length]`
fn parse_equipment(value: &str) -> Result<Equipment> {
    let (kind, length) = match value.split_once(':') {
        Some((kind, length)) => (kind, Some(length)),
        None => (value, None),
    };

    let kind = kind.parse::<EquipmentKind>()?;
    let min_length = length
        .map(|l| {
            l.trim()
                .parse::<u32>()
                .with_context(|| format!("EQUIPMENT: bad length {:?}", l))
        })
        .transpose()?;

    Ok(Equipment { kind, min_length })
}

/// Namespace identifying a search by what it looks for
fn default_namespace(constraints: &SearchConstraints) -> String {
    let (min, max) = constraints.nights_spec().bounds();
    format!(
        "{}:{}:{}:{}-{}",
        constraints.unique_campground_ids().join(","),
        constraints.date_range.start,
        constraints.date_range.end,
        min,
        max
    )
}
