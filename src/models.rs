//! Data models for USGS catalog query responses.
//!
//! The wire structures match the GeoJSON format returned by the FDSN event
//! query endpoint. They are validated and normalized into [`SearchResult`]
//! before anything else in the crate sees them.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::FetchError;

/// Placeholder shown for events without a place description.
pub const UNKNOWN_PLACE: &str = "N/A";

/// Top-level GeoJSON response from the query endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureCollection {
    /// Always "FeatureCollection"
    #[serde(rename = "type")]
    pub type_: String,

    /// Earthquake events
    pub features: Vec<Feature>,

    /// Only present when the response holds at least two features
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
}

impl FeatureCollection {
    /// Validate the response structure and normalize it into a [`SearchResult`].
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Decode`] if the collection or any of its features
    /// do not have the expected shape.
    pub fn into_result(self) -> Result<SearchResult, FetchError> {
        if self.type_ != "FeatureCollection" {
            return Err(FetchError::Decode(format!(
                "expected type 'FeatureCollection', got '{}'",
                self.type_
            )));
        }

        let bbox = self.bbox.as_deref().map(BoundingBox::try_from).transpose()?;

        let events = self
            .features
            .into_iter()
            .map(EarthquakeEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SearchResult { events, bbox })
    }
}

/// A single earthquake event on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct Feature {
    /// Unique event ID
    pub id: String,

    /// Geographic location
    pub geometry: Geometry,

    /// Event properties
    pub properties: Properties,
}

/// Geographic geometry for an event.
#[derive(Debug, Clone, Deserialize)]
pub struct Geometry {
    /// Coordinates: [longitude, latitude, depth_km]
    pub coordinates: Vec<f64>,
}

/// The subset of event properties this crate reads.
#[derive(Debug, Clone, Deserialize)]
pub struct Properties {
    /// Magnitude value
    pub mag: Option<f64>,

    /// Magnitude type (mb, Ml, Mw, etc.)
    #[serde(rename = "magType")]
    pub mag_type: Option<String>,

    /// Human-readable place description
    pub place: Option<String>,

    /// Event time (ms since epoch)
    pub time: i64,

    /// Human-readable title
    pub title: Option<String>,

    /// Event page URL
    pub url: Option<String>,
}

/// One earthquake in a search result. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EarthquakeEvent {
    pub id: String,
    pub longitude: f64,
    pub latitude: f64,
    pub depth_km: f64,
    pub magnitude: f64,
    pub magnitude_type: Option<String>,
    pub place: Option<String>,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub title: Option<String>,
    pub url: Option<String>,
}

impl EarthquakeEvent {
    /// Place description, or `"N/A"` when the catalog has none.
    #[must_use]
    pub fn place_or_na(&self) -> &str {
        match self.place.as_deref() {
            Some(place) if !place.is_empty() => place,
            _ => UNKNOWN_PLACE,
        }
    }

    /// Get the event time as a `DateTime<Utc>`.
    #[must_use]
    pub fn time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

impl TryFrom<Feature> for EarthquakeEvent {
    type Error = FetchError;

    fn try_from(f: Feature) -> Result<Self, Self::Error> {
        if f.id.is_empty() {
            return Err(FetchError::Decode("empty event ID".into()));
        }
        let [longitude, latitude, depth_km] = f.geometry.coordinates[..] else {
            return Err(FetchError::Decode(format!(
                "event {}: expected 3 coordinates, got {}",
                f.id,
                f.geometry.coordinates.len()
            )));
        };
        let Some(magnitude) = f.properties.mag else {
            return Err(FetchError::Decode(format!("event {}: missing magnitude", f.id)));
        };

        Ok(Self {
            id: f.id,
            longitude,
            latitude,
            depth_km,
            magnitude,
            magnitude_type: f.properties.mag_type,
            place: f.properties.place,
            timestamp: f.properties.time,
            title: f.properties.title,
            url: f.properties.url,
        })
    }
}

/// Box enclosing every event of a result, as reported by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub min_depth: f64,
    pub max_lng: f64,
    pub max_lat: f64,
    pub max_depth: f64,
}

impl TryFrom<&[f64]> for BoundingBox {
    type Error = FetchError;

    fn try_from(v: &[f64]) -> Result<Self, Self::Error> {
        let [min_lng, min_lat, min_depth, max_lng, max_lat, max_depth] = *v else {
            return Err(FetchError::Decode(format!(
                "expected 6 bbox values, got {}",
                v.len()
            )));
        };
        Ok(Self {
            min_lng,
            min_lat,
            min_depth,
            max_lng,
            max_lat,
            max_depth,
        })
    }
}

/// One complete response to a submitted search.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResult {
    pub events: Vec<EarthquakeEvent>,
    pub bbox: Option<BoundingBox>,
}

impl SearchResult {
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Iterate over event ids in result order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|e| e.id.as_str())
    }

    /// Look up an event by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&EarthquakeEvent> {
        self.events.iter().find(|e| e.id == id)
    }
}

/// Simplified event for CLI output.
///
/// This is the normalized structure we emit in JSON/NDJSON output.
#[derive(Debug, Clone, Serialize)]
pub struct OutputEvent {
    pub id: String,
    pub time: String,
    pub magnitude: f64,
    pub magnitude_type: Option<String>,
    pub depth_km: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub place: String,
    pub distance_km: Option<f64>,
    pub url: Option<String>,
}

impl OutputEvent {
    /// Build an output record, optionally annotated with distance from `center`.
    #[must_use]
    pub fn new(e: &EarthquakeEvent, distance_km: Option<f64>) -> Self {
        Self {
            id: e.id.clone(),
            time: e
                .time()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".into()),
            magnitude: e.magnitude,
            magnitude_type: e.magnitude_type.clone(),
            depth_km: e.depth_km,
            latitude: e.latitude,
            longitude: e.longitude,
            place: e.place_or_na().to_string(),
            distance_km,
            url: e.url.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = include_str!("../tools/sample_query.geojson");

    /// Build a minimal event for tests elsewhere in the crate.
    pub(crate) fn event(id: &str, magnitude: f64, lat: f64, lng: f64, timestamp: i64) -> EarthquakeEvent {
        EarthquakeEvent {
            id: id.into(),
            longitude: lng,
            latitude: lat,
            depth_km: 10.0,
            magnitude,
            magnitude_type: Some("mw".into()),
            place: Some(format!("near {id}")),
            timestamp,
            title: None,
            url: None,
        }
    }

    #[test]
    fn test_parse_sample_response() {
        let collection: FeatureCollection =
            serde_json::from_str(SAMPLE).expect("failed to parse sample response");
        let result = collection.into_result().expect("invalid response");

        assert_eq!(result.len(), 3);
        assert_eq!(
            result.ids().collect::<Vec<_>>(),
            ["iscgem16957905", "iscgem16958009", "iscgem893648"]
        );

        let first = &result.events[0];
        assert!((first.longitude - (-122.488)).abs() < 1e-9);
        assert!((first.latitude - 37.725).abs() < 1e-9);
        assert!((first.depth_km - 8.0).abs() < 1e-9);
        assert!((first.magnitude - 7.9).abs() < 1e-9);

        let bbox = result.bbox.expect("sample has a bbox");
        assert!((bbox.min_lng - (-125.5)).abs() < 1e-9);
        assert!((bbox.max_depth - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_place_reads_as_na() {
        let collection: FeatureCollection = serde_json::from_str(SAMPLE).unwrap();
        let result = collection.into_result().unwrap();
        assert_eq!(result.events[1].place_or_na(), UNKNOWN_PLACE);
        assert_eq!(result.events[0].place_or_na(), "San Francisco, California");
    }

    #[test]
    fn test_wrong_collection_type_is_decode_error() {
        let json = r#"{"type": "Feature", "features": []}"#;
        let collection: FeatureCollection = serde_json::from_str(json).unwrap();
        assert!(matches!(collection.into_result(), Err(FetchError::Decode(_))));
    }

    #[test]
    fn test_short_coordinates_are_rejected() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [{
                "id": "x1",
                "geometry": {"coordinates": [1.0, 2.0]},
                "properties": {"mag": 5.0, "time": 0}
            }]
        }"#;
        let collection: FeatureCollection = serde_json::from_str(json).unwrap();
        let err = collection.into_result().unwrap_err();
        assert!(err.to_string().contains("expected 3 coordinates"));
    }

    #[test]
    fn test_null_magnitude_is_rejected() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [{
                "id": "x1",
                "geometry": {"coordinates": [1.0, 2.0, 3.0]},
                "properties": {"mag": null, "time": 0}
            }]
        }"#;
        let collection: FeatureCollection = serde_json::from_str(json).unwrap();
        assert!(matches!(collection.into_result(), Err(FetchError::Decode(_))));
    }

    #[test]
    fn test_empty_response_has_no_bbox() {
        let json = r#"{"type": "FeatureCollection", "features": []}"#;
        let collection: FeatureCollection = serde_json::from_str(json).unwrap();
        let result = collection.into_result().unwrap();
        assert!(result.is_empty());
        assert!(result.bbox.is_none());
    }
}
