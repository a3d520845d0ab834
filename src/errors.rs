//! Error types for quakesearch.
//!
//! Uses `thiserror` for library-style error definitions.

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while fetching from the earthquake catalog.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport failure (connect, timeout, body read)
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Catalog returned a non-success status
    #[error("USGS API error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Body did not match the expected GeoJSON schema
    #[error("Invalid response: {0}")]
    Decode(String),

    /// Cancellation was requested before the request completed
    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether this outcome is a silent cancellation rather than a failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// A form field that a validation error points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Location,
    StartDate,
    EndDate,
    Magnitude,
    Radius,
    ResultLimit,
}

/// A search parameter invariant that does not hold.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("no search location chosen")]
    MissingLocation,

    #[error("location {lat}, {lng} is out of range")]
    LocationOutOfRange { lat: f64, lng: f64 },

    #[error("start date is missing")]
    MissingStartDate,

    #[error("end date is missing")]
    MissingEndDate,

    #[error("start date {start} is after end date {end}")]
    StartAfterEnd { start: String, end: String },

    #[error("start date and end date are both {date}")]
    StartEqualsEnd { date: String },

    #[error("start date {start} must be before today ({today})")]
    StartNotBeforeToday { start: String, today: String },

    #[error("magnitude range {min}-{max} is invalid (expected 0 <= min <= max <= 10)")]
    MagnitudeRange { min: f64, max: f64 },

    #[error("search radius {0} km is out of range [100, 20000]")]
    RadiusOutOfRange(f64),

    #[error("result limit {0} is out of range [10, 1000]")]
    LimitOutOfRange(u32),
}

impl ValidationError {
    /// Fields the UI should mark for this error.
    #[must_use]
    pub fn fields(&self) -> &'static [Field] {
        match self {
            Self::MissingLocation | Self::LocationOutOfRange { .. } => &[Field::Location],
            Self::MissingStartDate => &[Field::StartDate],
            Self::MissingEndDate => &[Field::EndDate],
            Self::StartAfterEnd { .. } | Self::StartEqualsEnd { .. } => {
                &[Field::StartDate, Field::EndDate]
            }
            Self::StartNotBeforeToday { .. } => &[Field::StartDate],
            Self::MagnitudeRange { .. } => &[Field::Magnitude],
            Self::RadiusOutOfRange(_) => &[Field::Radius],
            Self::LimitOutOfRange(_) => &[Field::ResultLimit],
        }
    }
}

/// Toggle requested for an id that is not part of the current result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown event id: {0}")]
pub struct UnknownEvent(pub String);

/// The search session task is no longer running.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("search session has shut down")]
pub struct SessionClosed;
