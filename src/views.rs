//! Read-only derivations of a search result for the map, table and charts.
//!
//! Nothing here mutates the result or the selection; highlight changes go
//! through the session's toggle intent.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::geo::{GeoPoint, LatLngBounds};
use crate::models::{EarthquakeEvent, SearchResult};
use crate::selection::SelectionState;

/// Number of integer-magnitude histogram bins (0-1 up to 9-10).
pub const HISTOGRAM_BINS: usize = 10;

/// Page sizes offered by the table.
pub const PAGE_SIZES: [usize; 5] = [10, 20, 30, 40, 50];

/// Largest marker scale the map offers.
pub const MAX_MARKER_SCALE: u8 = 5;

/// Summary line shown after a search completes.
#[must_use]
pub fn found_message(count: usize) -> String {
    let plural = if count == 1 { "" } else { "s" };
    format!("{count} Earthquake{plural} Found")
}

// ============================================================================
// Charts
// ============================================================================

/// Count events per integer magnitude.
///
/// Magnitudes are truncated; 10.0 lands in the top bin and anything below
/// zero in the bottom one.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn magnitude_histogram(events: &[EarthquakeEvent]) -> [usize; HISTOGRAM_BINS] {
    let mut bins = [0; HISTOGRAM_BINS];
    for e in events {
        let bin = (e.magnitude.trunc() as i64).clamp(0, HISTOGRAM_BINS as i64 - 1) as usize;
        bins[bin] += 1;
    }
    bins
}

/// One bar of the magnitude-vs-count chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBar {
    /// Lower edge of the bin
    pub magnitude: usize,
    /// Bar center on a linear axis
    pub x: f64,
    pub count: usize,
    pub label: String,
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn histogram_bars(events: &[EarthquakeEvent]) -> Vec<HistogramBar> {
    magnitude_histogram(events)
        .into_iter()
        .enumerate()
        .map(|(magnitude, count)| HistogramBar {
            magnitude,
            x: magnitude as f64 + 0.5,
            count,
            label: format!("Magnitude: {} - {}", magnitude, magnitude + 1),
        })
        .collect()
}

/// One point of the time-vs-magnitude chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub id: String,
    /// Epoch milliseconds
    pub x: i64,
    pub y: f64,
    pub place: String,
}

#[must_use]
pub fn scatter_points(events: &[EarthquakeEvent]) -> Vec<ScatterPoint> {
    events
        .iter()
        .map(|e| ScatterPoint {
            id: e.id.clone(),
            x: e.timestamp,
            y: e.magnitude,
            place: e.place_or_na().to_string(),
        })
        .collect()
}

// ============================================================================
// Table
// ============================================================================

/// Sortable table columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Magnitude,
    Date,
}

impl SortKey {
    /// Magnitude sorts largest-first on first click, date oldest-first.
    #[must_use]
    pub fn descending_first(self) -> bool {
        matches!(self, Self::Magnitude)
    }
}

/// Table view request, as sent by the dashboard.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TableQuery {
    pub sort: SortKey,
    pub desc: Option<bool>,
    /// Zero-based page index
    pub page: usize,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub id: String,
    pub place: String,
    pub magnitude: f64,
    pub timestamp: i64,
    pub date: String,
    pub selected: bool,
}

/// One page of the sorted table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TablePage {
    pub rows: Vec<TableRow>,
    pub sort: SortKey,
    pub desc: bool,
    pub page: usize,
    pub page_size: usize,
    pub page_count: usize,
    pub total: usize,
    pub can_previous: bool,
    pub can_next: bool,
}

fn compare(a: &EarthquakeEvent, b: &EarthquakeEvent, key: SortKey) -> Ordering {
    match key {
        SortKey::Magnitude => a.magnitude.total_cmp(&b.magnitude),
        SortKey::Date => a.timestamp.cmp(&b.timestamp),
    }
}

/// Sort and paginate the result. Out-of-range pages clamp to the last page.
#[must_use]
pub fn table_page(result: &SearchResult, selection: &SelectionState, query: &TableQuery) -> TablePage {
    let desc = query.desc.unwrap_or_else(|| query.sort.descending_first());
    let page_size = query
        .page_size
        .filter(|s| PAGE_SIZES.contains(s))
        .unwrap_or(PAGE_SIZES[0]);

    let mut sorted: Vec<&EarthquakeEvent> = result.events.iter().collect();
    sorted.sort_by(|a, b| {
        let ord = compare(a, b, query.sort);
        if desc { ord.reverse() } else { ord }
    });

    let total = sorted.len();
    let page_count = total.div_ceil(page_size).max(1);
    let page = query.page.min(page_count - 1);

    let rows = sorted
        .into_iter()
        .skip(page * page_size)
        .take(page_size)
        .map(|e| TableRow {
            id: e.id.clone(),
            place: e.place_or_na().to_string(),
            magnitude: e.magnitude,
            timestamp: e.timestamp,
            date: e
                .time()
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "unknown".into()),
            selected: selection.is_selected(&e.id),
        })
        .collect();

    TablePage {
        rows,
        sort: query.sort,
        desc,
        page,
        page_size,
        page_count,
        total,
        can_previous: page > 0,
        can_next: page + 1 < page_count,
    }
}

// ============================================================================
// Map
// ============================================================================

/// Bounds that show the searched center and every event.
///
/// `None` until a search has succeeded with at least one event.
#[must_use]
pub fn map_framing(center: Option<GeoPoint>, result: Option<&SearchResult>) -> Option<LatLngBounds> {
    let center = center?;
    let result = result.filter(|r| !r.is_empty())?;

    let mut bounds = LatLngBounds::around(center);
    for e in &result.events {
        bounds.extend(GeoPoint::new(e.latitude, e.longitude));
    }
    Some(bounds)
}

/// Marker diameter in pixels for a magnitude at the chosen scale (0..=5).
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn marker_size_px(magnitude: f64, scale: u8) -> u32 {
    let scale = f64::from(scale.min(MAX_MARKER_SCALE));
    (magnitude.max(0.0) * scale * 2.0).round() as u32
}

/// A map marker for one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub size_px: u32,
    pub selected: bool,
    pub tooltip: Vec<String>,
}

#[must_use]
pub fn markers(result: &SearchResult, selection: &SelectionState, scale: u8) -> Vec<Marker> {
    result
        .events
        .iter()
        .map(|e| Marker {
            id: e.id.clone(),
            lat: e.latitude,
            lng: e.longitude,
            size_px: marker_size_px(e.magnitude, scale),
            selected: selection.is_selected(&e.id),
            tooltip: vec![
                e.place_or_na().to_string(),
                format!("Magnitude: {}", e.magnitude),
                e.time()
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| "unknown".into()),
            ],
        })
        .collect()
}
