use campsite_monitor::{AvailableCampsite, Campground, Coordinates, ProviderError, StayWindow};
use tracing::{debug, warn};

// Patterns for the Camava reservation page
lazy_static::lazy_static! {
    static ref FACILITY_SELECT: regex::Regex = regex::Regex::new(
        r#"(?is)<select[^>]*\bname\s*=\s*["']parent_idno["'][^>]*>(.*?)</select>"#
    ).unwrap();

    static ref OPTION: regex::Regex = regex::Regex::new(
        r#"(?is)<option([^>]*)>(.*?)</option>"#
    ).unwrap();

    static ref SITE_DIV: regex::Regex = regex::Regex::new(
        r#"(?is)<div\b([^>]*\bdata-id\s*=\s*["'][^"']*["'][^>]*)>"#
    ).unwrap();

    static ref TAG: regex::Regex = regex::Regex::new(r"(?s)<[^>]*>").unwrap();

    static ref VALUE_ATTR: regex::Regex = attribute_pattern("value");
    static ref DATA_ID_ATTR: regex::Regex = attribute_pattern("data-id");
    static ref DATA_LAT_ATTR: regex::Regex = attribute_pattern("data-lat");
    static ref DATA_LNG_ATTR: regex::Regex = attribute_pattern("data-lng");

    static ref SITE_NUMBER: regex::Regex = regex::Regex::new(
        r"(?i)\bSite\s+(\d+[A-Z]?)\b"
    ).unwrap();
    static ref USE_FEE: regex::Regex = regex::Regex::new(
        r"(?i)Use Fee:\s*\$(\d+(?:\.\d{1,2})?)"
    ).unwrap();
    static ref PERSONS: regex::Regex = regex::Regex::new(r"(?i)Persons:\s*(\d+)").unwrap();
    static ref MAX_LENGTH: regex::Regex = regex::Regex::new(
        r"(?i)Max(?:imum)? Length:\s*(\d+)"
    ).unwrap();

    static ref RV_WORD: regex::Regex = regex::Regex::new(r"(?i)\bRVs?\b").unwrap();
    static ref TENT_WORD: regex::Regex = regex::Regex::new(r"(?i)\btents?\b").unwrap();
    static ref GROUP_WORD: regex::Regex = regex::Regex::new(r"(?i)\bgroup\b").unwrap();
}

fn attribute_pattern(name: &str) -> regex::Regex {
    regex::Regex::new(&format!(
        r#"(?i)\b{}\s*=\s*["']([^"']*)["']"#,
        regex::escape(name)
    ))
    .unwrap()
}

/// Read one attribute out of the inside of an opening tag
fn attribute(tag_body: &str, pattern: &regex::Regex) -> Option<String> {
    pattern
        .captures(tag_body)
        .map(|caps| decode_entities(caps[1].trim()))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&#36;", "$")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Visible text of an HTML fragment with whitespace collapsed
fn text_content(html: &str) -> String {
    let stripped = TAG.replace_all(html, " ");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Campgrounds offered in the reservation page's facility dropdown
pub fn parse_campgrounds(html: &str) -> Result<Vec<Campground>, ProviderError> {
    let select = FACILITY_SELECT.captures(html).ok_or_else(|| {
        ProviderError::MalformedResponse("reservation page has no parent_idno dropdown".to_string())
    })?;

    let mut campgrounds = Vec::new();
    for option in OPTION.captures_iter(&select[1]) {
        let Some(facility_id) = attribute(&option[1], &VALUE_ATTR) else {
            continue;
        };
        let facility_name = text_content(&option[2]);

        // placeholder entries like "Select a park" have no numeric value
        if facility_id.is_empty()
            || facility_name.is_empty()
            || !facility_id.chars().all(|c| c.is_ascii_digit())
        {
            continue;
        }

        debug!("Found campground {} (ID: {})", facility_name, facility_id);
        campgrounds.push(Campground {
            facility_id,
            facility_name,
        });
    }

    Ok(campgrounds)
}

/// Site type label from the keywords in a site's description
fn site_type(text: &str) -> &'static str {
    if RV_WORD.is_match(text) {
        "RV"
    } else if TENT_WORD.is_match(text) {
        "Tent"
    } else if GROUP_WORD.is_match(text) {
        "Group"
    } else {
        "Standard"
    }
}

fn coordinates(tag_body: &str) -> Option<Coordinates> {
    let latitude = attribute(tag_body, &DATA_LAT_ATTR)?.parse::<f64>().ok()?;
    let longitude = attribute(tag_body, &DATA_LNG_ATTR)?.parse::<f64>().ok()?;
    Some(Coordinates {
        latitude,
        longitude,
    })
}

/// Sites listed in a search response
///
/// Camava only renders bookable sites, each as a `<div data-id="...">`
/// block. A block runs until the next site block starts; a site listed more
/// than once is taken once.
pub fn parse_available_sites(
    html: &str,
    campground_id: &str,
    stay_window: &StayWindow,
    booking_url: &str,
) -> Vec<AvailableCampsite> {
    let openings: Vec<(usize, usize, String)> = SITE_DIV
        .captures_iter(html)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((whole.start(), whole.end(), caps[1].to_string()))
        })
        .collect();

    let mut seen: Vec<String> = Vec::new();
    let mut sites = Vec::new();

    for (index, (_, body_start, tag_body)) in openings.iter().enumerate() {
        let body_end = openings
            .get(index + 1)
            .map(|(next_start, _, _)| *next_start)
            .unwrap_or(html.len());

        let campsite_id = attribute(tag_body, &DATA_ID_ATTR).unwrap_or_default();
        if seen.contains(&campsite_id) {
            continue;
        }
        seen.push(campsite_id.clone());

        if campsite_id.is_empty() || !campsite_id.chars().all(|c| c.is_ascii_digit()) {
            warn!("Skipping site with unusable id {:?}", campsite_id);
            continue;
        }

        let text = text_content(&html[*body_start..body_end]);

        let site_name = SITE_NUMBER
            .captures(&text)
            .map(|caps| format!("Site {}", &caps[1]))
            .unwrap_or_else(|| format!("Site {}", campsite_id));

        sites.push(AvailableCampsite {
            campsite_id,
            campground_id: campground_id.to_string(),
            site_name,
            site_type: site_type(&text).to_string(),
            stay_window: *stay_window,
            price: USE_FEE
                .captures(&text)
                .and_then(|caps| caps[1].parse::<f64>().ok()),
            capacity: PERSONS
                .captures(&text)
                .and_then(|caps| caps[1].parse::<u32>().ok()),
            site_length: MAX_LENGTH
                .captures(&text)
                .and_then(|caps| caps[1].parse::<u32>().ok()),
            coordinates: coordinates(tag_body),
            booking_url: Some(booking_url.to_string()),
        });
    }

    sites
}
