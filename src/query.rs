//! Search parameters and the catalog query builder.
//!
//! [`SearchParameters`] is the user-facing form. It is resolved against the
//! caller's local date into a [`ResolvedSearch`], which [`build_request`]
//! turns into a [`CatalogRequest`] without any I/O.

use std::fmt;

use chrono::{Local, NaiveDate, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::geo::GeoPoint;

/// USGS FDSN event query endpoint.
pub const USGS_QUERY_URL: &str = "https://earthquake.usgs.gov/fdsnws/event/1/query";

pub const MIN_MAGNITUDE: f64 = 0.0;
pub const MAX_MAGNITUDE: f64 = 10.0;
/// Smallest distance the two magnitude thumbs may be apart.
pub const MIN_MAGNITUDE_GAP: f64 = 0.1;

pub const MIN_RADIUS_KM: f64 = 100.0;
pub const MAX_RADIUS_KM: f64 = 20_000.0;
const RADIUS_STEP_KM: f64 = 100.0;

pub const MIN_RESULTS: u32 = 10;
pub const MAX_RESULTS: u32 = 1000;
const RESULTS_STEP: f64 = 10.0;

/// Days covered by the "30 days before" start shortcut.
const RELATIVE_START_DAYS: i64 = 30;

/// The caller's current local calendar date.
#[must_use]
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// One end of the date range: a calendar date or a rule relative to today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DateBound {
    Fixed(NaiveDate),
    /// Today minus thirty days
    ThirtyDaysBefore,
    /// "Now", i.e. the caller's current date
    Today,
}

impl DateBound {
    /// Resolve to a concrete calendar date.
    #[must_use]
    pub fn resolve(self, today: NaiveDate) -> NaiveDate {
        match self {
            Self::Fixed(date) => date,
            Self::ThirtyDaysBefore => today - TimeDelta::days(RELATIVE_START_DAYS),
            Self::Today => today,
        }
    }
}

impl fmt::Display for DateBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Self::ThirtyDaysBefore => f.write_str("30_days_before"),
            Self::Today => f.write_str("today"),
        }
    }
}

impl std::str::FromStr for DateBound {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "30_days_before" | "30d" => Ok(Self::ThirtyDaysBefore),
            "today" | "now" => Ok(Self::Today),
            other => NaiveDate::parse_from_str(other, "%Y-%m-%d")
                .map(Self::Fixed)
                .map_err(|e| format!("invalid date '{s}' (expected YYYY-MM-DD, today or 30_days_before): {e}")),
        }
    }
}

impl TryFrom<String> for DateBound {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DateBound> for String {
    fn from(b: DateBound) -> Self {
        b.to_string()
    }
}

/// How strictly the start date is checked against today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRules {
    /// Accept a start date equal to today
    pub start_may_be_today: bool,
}

/// User-controlled search form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParameters {
    pub location: Option<GeoPoint>,
    pub start: Option<DateBound>,
    pub end: Option<DateBound>,
    pub min_magnitude: f64,
    pub max_magnitude: f64,
    pub radius_km: f64,
    pub result_limit: u32,
}

impl Default for SearchParameters {
    fn default() -> Self {
        Self {
            location: Some(GeoPoint::new(38.46, -144.56)),
            start: NaiveDate::from_ymd_opt(1900, 1, 1).map(DateBound::Fixed),
            end: Some(DateBound::Today),
            min_magnitude: 7.5,
            max_magnitude: MAX_MAGNITUDE,
            radius_km: 3000.0,
            result_limit: 50,
        }
    }
}

fn round_tenth(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

impl SearchParameters {
    /// Move the lower magnitude thumb, keeping it below the upper one.
    pub fn set_min_magnitude(&mut self, value: f64) {
        let ceiling = self.max_magnitude - MIN_MAGNITUDE_GAP;
        self.min_magnitude = round_tenth(value.min(ceiling).clamp(MIN_MAGNITUDE, MAX_MAGNITUDE));
    }

    /// Move the upper magnitude thumb, keeping it above the lower one.
    pub fn set_max_magnitude(&mut self, value: f64) {
        let floor = self.min_magnitude + MIN_MAGNITUDE_GAP;
        self.max_magnitude = round_tenth(value.max(floor).clamp(MIN_MAGNITUDE, MAX_MAGNITUDE));
    }

    /// Set the radius, rounded to the nearest 100 km within bounds.
    pub fn set_radius_km(&mut self, value: f64) {
        self.radius_km = ((value / RADIUS_STEP_KM).round() * RADIUS_STEP_KM)
            .clamp(MIN_RADIUS_KM, MAX_RADIUS_KM);
    }

    /// Set the result limit, rounded to the nearest 10 within bounds.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn set_result_limit(&mut self, value: u32) {
        let rounded = (f64::from(value) / RESULTS_STEP).round() * RESULTS_STEP;
        self.result_limit = (rounded as u32).clamp(MIN_RESULTS, MAX_RESULTS);
    }

    /// Check every invariant; an empty list means the form may be submitted.
    #[must_use]
    pub fn validate(&self, today: NaiveDate, rules: DateRules) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        match self.location {
            None => errors.push(ValidationError::MissingLocation),
            Some(p) if !p.in_range() => errors.push(ValidationError::LocationOutOfRange {
                lat: p.lat,
                lng: p.lng,
            }),
            Some(_) => {}
        }

        if self.start.is_none() {
            errors.push(ValidationError::MissingStartDate);
        }
        if self.end.is_none() {
            errors.push(ValidationError::MissingEndDate);
        }
        if let Some(start) = self.start.map(|b| b.resolve(today)) {
            if let Some(end) = self.end.map(|b| b.resolve(today)) {
                if start > end {
                    errors.push(ValidationError::StartAfterEnd {
                        start: start.to_string(),
                        end: end.to_string(),
                    });
                } else if start == end {
                    errors.push(ValidationError::StartEqualsEnd {
                        date: start.to_string(),
                    });
                }
            }

            let too_late = if rules.start_may_be_today {
                start > today
            } else {
                start >= today
            };
            if too_late {
                errors.push(ValidationError::StartNotBeforeToday {
                    start: start.to_string(),
                    today: today.to_string(),
                });
            }
        }

        let (min, max) = (self.min_magnitude, self.max_magnitude);
        if !(MIN_MAGNITUDE..=MAX_MAGNITUDE).contains(&min)
            || !(MIN_MAGNITUDE..=MAX_MAGNITUDE).contains(&max)
            || min > max
        {
            errors.push(ValidationError::MagnitudeRange { min, max });
        }
        if !(MIN_RADIUS_KM..=MAX_RADIUS_KM).contains(&self.radius_km) {
            errors.push(ValidationError::RadiusOutOfRange(self.radius_km));
        }
        if !(MIN_RESULTS..=MAX_RESULTS).contains(&self.result_limit) {
            errors.push(ValidationError::LimitOutOfRange(self.result_limit));
        }

        errors
    }

    /// Resolve relative dates and check invariants.
    ///
    /// # Errors
    ///
    /// Returns every violated invariant if the form is not submittable.
    pub fn resolve(
        &self,
        today: NaiveDate,
        rules: DateRules,
    ) -> Result<ResolvedSearch, Vec<ValidationError>> {
        let errors = self.validate(today, rules);
        let (Some(center), Some(start), Some(end), true) =
            (self.location, self.start, self.end, errors.is_empty())
        else {
            return Err(errors);
        };

        Ok(ResolvedSearch {
            center,
            start: start.resolve(today),
            end: end.resolve(today),
            min_magnitude: self.min_magnitude,
            max_magnitude: self.max_magnitude,
            radius_km: self.radius_km,
            result_limit: self.result_limit,
        })
    }
}

/// Validated parameters with concrete dates, ready to become a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSearch {
    pub center: GeoPoint,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub min_magnitude: f64,
    pub max_magnitude: f64,
    pub radius_km: f64,
    pub result_limit: u32,
}

/// A fully formed GET against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRequest {
    base_url: String,
    pairs: Vec<(&'static str, String)>,
}

impl CatalogRequest {
    /// The `key=value&...` part of the URL.
    #[must_use]
    pub fn query_string(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Full request URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}?{}", self.base_url, self.query_string())
    }
}

impl fmt::Display for CatalogRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Build the catalog request for a resolved search.
///
/// Results are requested as GeoJSON ordered by descending magnitude.
#[must_use]
pub fn build_request(search: &ResolvedSearch, base_url: &str) -> CatalogRequest {
    let pairs = vec![
        ("format", "geojson".to_string()),
        ("orderby", "magnitude".to_string()),
        ("starttime", search.start.format("%Y-%m-%d").to_string()),
        ("endtime", search.end.format("%Y-%m-%d").to_string()),
        ("latitude", search.center.lat.to_string()),
        ("longitude", search.center.lng.to_string()),
        ("maxradiuskm", search.radius_km.to_string()),
        ("minmagnitude", search.min_magnitude.to_string()),
        ("maxmagnitude", search.max_magnitude.to_string()),
        ("limit", search.result_limit.to_string()),
    ];

    CatalogRequest {
        base_url: base_url.trim_end_matches('?').to_string(),
        pairs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn params(start: &str, end: &str) -> SearchParameters {
        SearchParameters {
            location: Some(GeoPoint::new(37.77, -122.42)),
            start: Some(start.parse().unwrap()),
            end: Some(end.parse().unwrap()),
            min_magnitude: 7.5,
            max_magnitude: 10.0,
            radius_km: 3000.0,
            result_limit: 50,
        }
    }

    const TODAY: &str = "2024-06-15";

    #[test]
    fn test_build_reference_request() {
        let resolved = params("1900-01-01", "2020-01-01")
            .resolve(date(TODAY), DateRules::default())
            .unwrap();
        let request = build_request(&resolved, USGS_QUERY_URL);

        assert_eq!(
            request.query_string(),
            "format=geojson&orderby=magnitude&starttime=1900-01-01&endtime=2020-01-01\
             &latitude=37.77&longitude=-122.42&maxradiuskm=3000&minmagnitude=7.5\
             &maxmagnitude=10&limit=50"
        );
        assert!(request.url().starts_with(
            "https://earthquake.usgs.gov/fdsnws/event/1/query?format=geojson&orderby=magnitude&"
        ));
        assert_eq!(build_request(&resolved, USGS_QUERY_URL), request);
    }

    #[test]
    fn test_relative_dates_resolve_before_building() {
        let resolved = params("30_days_before", "today")
            .resolve(date(TODAY), DateRules::default())
            .unwrap();
        assert_eq!(resolved.start, date("2024-05-16"));
        assert_eq!(resolved.end, date(TODAY));

        let request = build_request(&resolved, "http://localhost:1234/query");
        assert!(request.query_string().contains("starttime=2024-05-16&endtime=2024-06-15"));
        assert!(request.url().starts_with("http://localhost:1234/query?"));
    }

    #[test]
    fn test_date_order_violations() {
        let today = date(TODAY);
        let rules = DateRules::default();

        let errs = params("2020-01-02", "2020-01-01").validate(today, rules);
        assert!(matches!(errs[..], [ValidationError::StartAfterEnd { .. }]));

        let errs = params("2020-01-01", "2020-01-01").validate(today, rules);
        assert!(matches!(errs[..], [ValidationError::StartEqualsEnd { .. }]));

        let errs = params(TODAY, "2030-01-01").validate(today, rules);
        assert!(matches!(errs[..], [ValidationError::StartNotBeforeToday { .. }]));

        let errs = params("2025-01-01", "2030-01-01").validate(today, rules);
        assert!(matches!(errs[..], [ValidationError::StartNotBeforeToday { .. }]));
    }

    #[test]
    fn test_start_today_allowed_when_relaxed() {
        let rules = DateRules {
            start_may_be_today: true,
        };
        let errs = params(TODAY, "2030-01-01").validate(date(TODAY), rules);
        assert!(errs.is_empty(), "{errs:?}");
    }

    #[test]
    fn test_missing_fields_block_resolution() {
        let mut p = params("1900-01-01", "2020-01-01");
        p.start = None;
        p.location = None;
        let errs = p.resolve(date(TODAY), DateRules::default()).unwrap_err();
        assert!(errs.contains(&ValidationError::MissingLocation));
        assert!(errs.contains(&ValidationError::MissingStartDate));

        let mut p = params("1900-01-01", "2020-01-01");
        p.end = None;
        let errs = p.validate(date(TODAY), DateRules::default());
        assert_eq!(errs, vec![ValidationError::MissingEndDate]);
    }

    #[test]
    fn test_out_of_range_numbers_are_invalid() {
        let mut p = params("1900-01-01", "2020-01-01");
        p.radius_km = 50.0;
        p.result_limit = 5000;
        p.min_magnitude = 9.0;
        p.max_magnitude = 8.0;
        let errs = p.validate(date(TODAY), DateRules::default());
        assert_eq!(errs.len(), 3);
    }

    #[test]
    fn test_magnitude_thumbs_keep_their_gap() {
        let mut p = SearchParameters::default();
        p.set_min_magnitude(10.0);
        assert!((p.min_magnitude - 9.9).abs() < 1e-9);
        p.set_max_magnitude(0.0);
        assert!((p.max_magnitude - 10.0).abs() < 1e-9);

        p.set_min_magnitude(-3.0);
        assert!(p.min_magnitude.abs() < 1e-9);
        p.set_max_magnitude(0.0);
        assert!((p.max_magnitude - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_radius_and_limit_snap_to_steps() {
        let mut p = SearchParameters::default();
        p.set_radius_km(1234.0);
        assert!((p.radius_km - 1200.0).abs() < 1e-9);
        p.set_radius_km(50_000.0);
        assert!((p.radius_km - MAX_RADIUS_KM).abs() < 1e-9);
        p.set_radius_km(1.0);
        assert!((p.radius_km - MIN_RADIUS_KM).abs() < 1e-9);

        p.set_result_limit(257);
        assert_eq!(p.result_limit, 260);
        p.set_result_limit(3);
        assert_eq!(p.result_limit, MIN_RESULTS);
        p.set_result_limit(99_999);
        assert_eq!(p.result_limit, MAX_RESULTS);
    }

    #[test]
    fn test_date_bound_parse() {
        assert_eq!("today".parse::<DateBound>().unwrap(), DateBound::Today);
        assert_eq!(
            "30_days_before".parse::<DateBound>().unwrap(),
            DateBound::ThirtyDaysBefore
        );
        assert_eq!(
            "2020-01-01".parse::<DateBound>().unwrap(),
            DateBound::Fixed(date("2020-01-01"))
        );
        assert!("2020-13-01".parse::<DateBound>().is_err());

        let json = serde_json::to_string(&DateBound::Fixed(date("1900-01-01"))).unwrap();
        assert_eq!(json, "\"1900-01-01\"");
    }
}
