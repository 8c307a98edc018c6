use chrono::{Datelike, NaiveDate, Weekday};

use crate::scan_types::{DateRange, SearchConstraints, StayWindow};

/// Expand a date range into the stay windows worth querying
///
/// The result is a pure function of its inputs; calling it again each cycle
/// yields the same windows in the same order: ascending arrival, then
/// ascending nights. Windows never depart after `date_range.end`.
pub fn expand(date_range: &DateRange, constraints: &SearchConstraints) -> StayWindows {
    let (min_nights, max_nights) = constraints.nights_spec().bounds();

    StayWindows {
        arrival: Some(date_range.start),
        nights: min_nights,
        min_nights,
        max_nights,
        end: date_range.end,
        rules: WindowRules::from(constraints),
    }
}

/// Calendar rules a stay window must satisfy, independent of any site
#[derive(Debug, Clone, Copy)]
pub struct WindowRules {
    weekends_only: bool,
    day_of_week: Option<Weekday>,
}

impl From<&SearchConstraints> for WindowRules {
    fn from(constraints: &SearchConstraints) -> Self {
        Self {
            weekends_only: constraints.weekends_only,
            day_of_week: constraints.day_of_week,
        }
    }
}

impl WindowRules {
    /// Whether the window passes the weekend and weekday rules
    pub fn accepts(&self, window: &StayWindow) -> bool {
        if self.weekends_only && !window.includes_weekend_night() {
            return false;
        }
        match self.day_of_week {
            Some(day) => window.arrival().weekday() == day,
            None => true,
        }
    }
}

/// Lazy sequence of stay windows produced by [`expand`]
#[derive(Debug, Clone)]
pub struct StayWindows {
    arrival: Option<NaiveDate>,
    nights: u32,
    min_nights: u32,
    max_nights: u32,
    end: NaiveDate,
    rules: WindowRules,
}

impl Iterator for StayWindows {
    type Item = StayWindow;

    fn next(&mut self) -> Option<StayWindow> {
        loop {
            let arrival = self.arrival?;

            if self.nights > self.max_nights {
                self.arrival = arrival.succ_opt();
                self.nights = self.min_nights;
                continue;
            }

            let window = match StayWindow::new(arrival, self.nights) {
                Ok(window) if window.departure() <= self.end => window,
                _ if self.nights == self.min_nights => {
                    // the shortest stay no longer fits, so no later arrival can
                    self.arrival = None;
                    return None;
                }
                _ => {
                    self.nights = self.max_nights + 1;
                    continue;
                }
            };

            self.nights += 1;
            if self.rules.accepts(&window) {
                return Some(window);
            }
        }
    }
}
