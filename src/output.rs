//! Output formatters for search results.
//!
//! Supports human-readable (with colors), JSON, and NDJSON formats.

use std::io::{self, Write};

use crate::geo::GeoPoint;
use crate::models::{EarthquakeEvent, OutputEvent};
use crate::views::{found_message, magnitude_histogram};

// ANSI color codes
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

// Magnitude-based colors
const RED: &str = "\x1b[91m"; // Critical: mag >= 7.0
const YELLOW: &str = "\x1b[93m"; // Warning: mag >= 6.0
const CYAN: &str = "\x1b[96m"; // Significant: mag >= 4.5
const GREEN: &str = "\x1b[92m"; // Moderate: mag >= 3.0
const WHITE: &str = "\x1b[97m"; // Minor: mag < 3.0

const ICON_QUAKE: &str = "🌍";

/// Widest histogram bar in characters.
const HISTOGRAM_WIDTH: usize = 40;

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Human-readable terminal output (default)
    #[default]
    Human,
    /// JSON array
    Json,
    /// Newline-delimited JSON (one object per line)
    Ndjson,
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            "ndjson" => Ok(Self::Ndjson),
            _ => Err(format!("unknown format: {s} (expected: human, json, ndjson)")),
        }
    }
}

/// Get the color code for a magnitude value.
fn magnitude_color(mag: f64) -> &'static str {
    match mag {
        m if m >= 7.0 => RED,
        m if m >= 6.0 => YELLOW,
        m if m >= 4.5 => CYAN,
        m if m >= 3.0 => GREEN,
        _ => WHITE,
    }
}

/// Get severity label for magnitude.
fn magnitude_label(mag: f64) -> &'static str {
    match mag {
        m if m >= 7.0 => "MAJOR",
        m if m >= 6.0 => "STRONG",
        m if m >= 4.5 => "MODERATE",
        m if m >= 3.0 => "LIGHT",
        m if m >= 2.0 => "MINOR",
        _ => "MICRO",
    }
}

/// Write events in human-readable format.
///
/// When `center` is given each line also shows the distance from it.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_human<W: Write>(
    writer: &mut W,
    events: &[EarthquakeEvent],
    center: Option<GeoPoint>,
) -> io::Result<()> {
    for event in events {
        let time = event
            .time()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".into());

        let mag = event.magnitude;
        let mag_type = event.magnitude_type.as_deref().unwrap_or("?");
        let depth = event.depth_km;
        let place = event.place_or_na();
        let color = magnitude_color(mag);
        let label = magnitude_label(mag);

        let distance = center
            .map(|c| {
                let km = c.distance_km(GeoPoint::new(event.latitude, event.longitude));
                format!(" {DIM}({km:.0} km away){RESET}")
            })
            .unwrap_or_default();

        writeln!(
            writer,
            "{ICON_QUAKE} {color}{BOLD}M{mag:.1}{RESET} {DIM}{mag_type}{RESET} │ \
             {color}{label:8}{RESET} │ \
             {DIM}{depth:>5.0}km{RESET} │ \
             {time} UTC │ \
             {place}{distance}"
        )?;
    }
    Ok(())
}

/// Write the "N Earthquakes Found" summary line.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_summary<W: Write>(writer: &mut W, count: usize) -> io::Result<()> {
    writeln!(writer, "{BOLD}{}{RESET}", found_message(count))
}

/// Write events as a JSON array.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_json<W: Write>(
    writer: &mut W,
    events: &[EarthquakeEvent],
    center: Option<GeoPoint>,
) -> io::Result<()> {
    let output: Vec<OutputEvent> = events.iter().map(|e| output_event(e, center)).collect();
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{json}")
}

/// Write events as newline-delimited JSON.
///
/// Each event is written as a single line of JSON.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_ndjson<W: Write>(
    writer: &mut W,
    events: &[EarthquakeEvent],
    center: Option<GeoPoint>,
) -> io::Result<()> {
    for event in events {
        let json = serde_json::to_string(&output_event(event, center))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(writer, "{json}")?;
    }
    Ok(())
}

fn output_event(e: &EarthquakeEvent, center: Option<GeoPoint>) -> OutputEvent {
    let distance = center.map(|c| c.distance_km(GeoPoint::new(e.latitude, e.longitude)));
    OutputEvent::new(e, distance)
}

/// Write events in the specified format.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_events<W: Write>(
    writer: &mut W,
    events: &[EarthquakeEvent],
    center: Option<GeoPoint>,
    format: Format,
) -> io::Result<()> {
    match format {
        Format::Human => write_human(writer, events, center),
        Format::Json => write_json(writer, events, center),
        Format::Ndjson => write_ndjson(writer, events, center),
    }
}

/// Write a magnitude-vs-count bar chart.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_histogram<W: Write>(writer: &mut W, events: &[EarthquakeEvent]) -> io::Result<()> {
    let bins = magnitude_histogram(events);
    let max = bins.iter().copied().max().unwrap_or(0).max(1);

    writeln!(writer, "{DIM}Magnitude vs. Count{RESET}")?;
    for (magnitude, count) in bins.iter().enumerate() {
        let width = count * HISTOGRAM_WIDTH / max;
        let bar = "█".repeat(width);
        writeln!(writer, "  {magnitude}-{:<2} │ {bar} {count}", magnitude + 1)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::models::tests::event;
    use crate::views::HISTOGRAM_BINS;

    #[test]
    fn test_format_parse() {
        assert_eq!("human".parse::<Format>().unwrap(), Format::Human);
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("ndjson".parse::<Format>().unwrap(), Format::Ndjson);
        assert!("invalid".parse::<Format>().is_err());
    }

    #[test]
    fn test_ndjson_line_per_event() {
        let events = vec![event("a", 7.1, 35.0, -120.0, 0), event("b", 6.0, 36.0, -121.0, 0)];
        let mut buf = Vec::new();
        write_ndjson(&mut buf, &events, Some(GeoPoint::new(35.0, -120.0))).unwrap();

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["id"], "a");
        assert!(first["distance_km"].as_f64().unwrap() < 1e-6);
    }

    #[test]
    fn test_human_uses_na_for_missing_place() {
        let mut e = event("a", 7.1, 35.0, -120.0, 0);
        e.place = None;
        let mut buf = Vec::new();
        write_human(&mut buf, &[e], None).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("N/A"));
        assert!(text.contains("MAJOR"));
    }

    #[test]
    fn test_histogram_rows() {
        let events = vec![event("a", 6.2, 0.0, 0.0, 0), event("b", 9.1, 0.0, 0.0, 0)];
        let mut buf = Vec::new();
        write_histogram(&mut buf, &events).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), HISTOGRAM_BINS + 1);
        assert!(text.contains("6-7"));
    }
}
