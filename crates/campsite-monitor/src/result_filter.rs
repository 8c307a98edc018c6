use crate::scan_types::{AvailableCampsite, Equipment, EquipmentKind, SearchConstraints};
use crate::window_expander::WindowRules;

/// Broad category of a provider's site type label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteCategory {
    /// Tent-only pads and walk-in sites
    Tent,
    /// Sites with RV / trailer hookups or pull-throughs
    Rv,
    /// Group sites
    Group,
    /// General-purpose sites
    Standard,
    /// Label the filter does not recognise
    Unknown,
}

impl SiteCategory {
    /// Classify a provider's free-form site type label
    pub fn classify(site_type: &str) -> Self {
        let label = site_type.to_ascii_lowercase();
        let words: Vec<&str> = label
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let has = |candidates: &[&str]| words.iter().any(|w| candidates.contains(w));

        if has(&["rv", "rvs", "trailer", "hookup", "hookups", "motorhome"]) {
            SiteCategory::Rv
        } else if has(&["tent", "tents", "walk"]) {
            SiteCategory::Tent
        } else if has(&["group"]) {
            SiteCategory::Group
        } else if words.is_empty() || has(&["standard"]) {
            SiteCategory::Standard
        } else {
            SiteCategory::Unknown
        }
    }

    fn accommodates(self, kind: EquipmentKind) -> bool {
        match (self, kind) {
            (SiteCategory::Unknown | SiteCategory::Standard, _) => true,
            (SiteCategory::Tent | SiteCategory::Group, EquipmentKind::Tent) => true,
            (SiteCategory::Rv, EquipmentKind::Rv | EquipmentKind::Trailer) => true,
            _ => false,
        }
    }
}

/// Keep only the sites that satisfy the user's constraints
///
/// Order is preserved and the output is always a subset of `raw`. Missing
/// provider data (unknown site type, unreported length) never excludes a site.
pub fn apply(
    constraints: &SearchConstraints,
    raw: Vec<AvailableCampsite>,
) -> Vec<AvailableCampsite> {
    raw.into_iter()
        .filter(|site| accepts(constraints, site))
        .collect()
}

/// Whether one site satisfies the user's constraints
pub fn accepts(constraints: &SearchConstraints, site: &AvailableCampsite) -> bool {
    let window = &site.stay_window;
    constraints.date_range.contains(window)
        && constraints.nights_spec().allows(window.nights())
        && WindowRules::from(constraints).accepts(window)
        && constraints
            .equipment
            .as_ref()
            .is_none_or(|equipment| fits_equipment(site, equipment))
}

fn fits_equipment(site: &AvailableCampsite, equipment: &Equipment) -> bool {
    if !SiteCategory::classify(&site.site_type).accommodates(equipment.kind) {
        return false;
    }
    match (site.site_length, equipment.min_length) {
        (Some(length), Some(required)) => length >= required,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan_types::{DateRange, NightsSpec, SearchMode, StayWindow};
    use chrono::{NaiveDate, Weekday};
    use std::time::Duration;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    fn constraints() -> SearchConstraints {
        SearchConstraints {
            campground_ids: vec!["2".to_string()],
            date_range: DateRange::new(date(5, 1), date(5, 31)),
            nights: Some(NightsSpec::Range { min: 1, max: 3 }),
            weekends_only: false,
            day_of_week: None,
            equipment: None,
            polling_interval: Duration::from_secs(600),
            mode: SearchMode::RunOnce,
            offline: false,
        }
    }

    fn site(
        id: &str,
        site_type: &str,
        arrival: NaiveDate,
        nights: u32,
        length: Option<u32>,
    ) -> AvailableCampsite {
        AvailableCampsite {
            campsite_id: id.to_string(),
            campground_id: "2".to_string(),
            site_name: format!("Site {}", id),
            site_type: site_type.to_string(),
            stay_window: StayWindow::new(arrival, nights).unwrap(),
            price: None,
            capacity: None,
            site_length: length,
            coordinates: None,
            booking_url: None,
        }
    }

    fn ids(sites: &[AvailableCampsite]) -> Vec<&str> {
        sites.iter().map(|s| s.campsite_id.as_str()).collect()
    }

    #[test]
    fn test_no_filters_keeps_everything_in_order() {
        let raw = vec![
            site("3", "Tent", date(5, 2), 1, None),
            site("1", "RV", date(5, 2), 1, None),
            site("2", "Group", date(5, 2), 1, None),
        ];
        assert_eq!(ids(&apply(&constraints(), raw)), vec!["3", "1", "2"]);
    }

    #[test]
    fn test_equipment_kind_and_length() {
        let mut c = constraints();
        c.equipment = Some(Equipment {
            kind: EquipmentKind::Rv,
            min_length: Some(30),
        });

        let raw = vec![
            site("tent", "Tent", date(5, 2), 1, None),
            site("short", "RV", date(5, 2), 1, Some(25)),
            site("long", "RV Hookup", date(5, 2), 1, Some(40)),
            site("unmeasured", "RV", date(5, 2), 1, None),
            site("standard", "Standard", date(5, 2), 1, Some(35)),
            site("mystery", "Yurt", date(5, 2), 1, None),
        ];
        assert_eq!(
            ids(&apply(&c, raw)),
            vec!["long", "unmeasured", "standard", "mystery"]
        );
    }

    #[test]
    fn test_tent_accepts_group_sites() {
        let mut c = constraints();
        c.equipment = Some(Equipment {
            kind: EquipmentKind::Tent,
            min_length: None,
        });
        let raw = vec![
            site("a", "Group", date(5, 2), 1, None),
            site("b", "RV", date(5, 2), 1, None),
        ];
        assert_eq!(ids(&apply(&c, raw)), vec!["a"]);
    }

    #[test]
    fn test_weekends_only_on_results() {
        let mut c = constraints();
        c.weekends_only = true;
        let raw = vec![
            // Thursday for three nights covers Friday and Saturday
            site("thu", "Tent", date(5, 7), 3, None),
            // Sunday for one night does not
            site("sun", "Tent", date(5, 10), 1, None),
        ];
        assert_eq!(ids(&apply(&c, raw)), vec!["thu"]);
    }

    #[test]
    fn test_nights_and_range_and_weekday() {
        let mut c = constraints();
        c.day_of_week = Some(Weekday::Fri);
        let raw = vec![
            site("fri", "Tent", date(5, 8), 2, None),
            site("sat", "Tent", date(5, 9), 2, None),
            site("too_long", "Tent", date(5, 8), 5, None),
            site("outside", "Tent", date(5, 29), 3, None),
        ];
        assert_eq!(ids(&apply(&c, raw)), vec!["fri"]);
    }

    #[test]
    fn test_site_classification() {
        assert_eq!(SiteCategory::classify("RV"), SiteCategory::Rv);
        assert_eq!(SiteCategory::classify("Tent Only"), SiteCategory::Tent);
        assert_eq!(SiteCategory::classify("GROUP STANDARD"), SiteCategory::Group);
        assert_eq!(SiteCategory::classify("Standard"), SiteCategory::Standard);
        assert_eq!(SiteCategory::classify("Cabin"), SiteCategory::Unknown);
    }
}
