//! Core data types for camera sources, observations, and forecasts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Object classes that are persisted by default. Everything else is dropped.
pub const DEFAULT_TARGET_LABELS: [&str; 9] = [
    "car",
    "person",
    "truck",
    "bus",
    "train",
    "bicycle",
    "motorbike",
    "cat",
    "dog",
];

/// Labels whose counts are summed into the forecast signal.
pub const DEFAULT_FORECAST_LABELS: [&str; 3] = ["car", "bus", "truck"];

/// A registered camera location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub address: String,
    pub image_url: String,
    pub region: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// A pixel coordinate reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxCorner {
    pub x: f64,
    pub y: f64,
}

/// One labeled box as returned by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f64,
    pub topleft: BoxCorner,
    pub bottomright: BoxCorner,
}

/// Per-label aggregate for one source in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub source_id: i64,
    pub timestamp: DateTime<Utc>,
    pub label: String,
    pub count: i64,
    /// Mean confidence of the detections sharing this label, in `[0, 1]`.
    pub confidence: f64,
}

/// A single detected object, kept for location history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionPoint {
    pub source_id: i64,
    pub timestamp: DateTime<Utc>,
    pub label: String,
    pub x_top_left: f64,
    pub y_top_left: f64,
    pub x_bottom_right: f64,
    pub y_bottom_right: f64,
    pub x_center: f64,
    pub y_center: f64,
    pub confidence: f64,
}

impl DetectionPoint {
    /// Build a point from a raw box, computing its center.
    pub fn from_raw(source_id: i64, timestamp: DateTime<Utc>, raw: &RawDetection) -> Self {
        let (x0, y0) = (raw.topleft.x, raw.topleft.y);
        let (x1, y1) = (raw.bottomright.x, raw.bottomright.y);
        Self {
            source_id,
            timestamp,
            label: raw.label.clone(),
            x_top_left: x0,
            y_top_left: y0,
            x_bottom_right: x1,
            y_bottom_right: y1,
            x_center: x0 + 0.5 * (x1 - x0),
            y_center: y0 + 0.5 * (y1 - y0),
            confidence: raw.confidence,
        }
    }
}

/// Everything produced by one ingestion cycle, across all sources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleBatch {
    pub observations: Vec<Observation>,
    pub detection_points: Vec<DetectionPoint>,
}

impl CycleBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append another batch, preserving order.
    pub fn extend(&mut self, other: CycleBatch) {
        self.observations.extend(other.observations);
        self.detection_points.extend(other.detection_points);
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty() && self.detection_points.is_empty()
    }
}

/// Row counts actually written by a cycle commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleWriteSummary {
    pub observations: usize,
    pub detection_points: usize,
}

/// One forecast or historical value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    /// RFC 3339 timestamp in the configured time zone.
    pub time: String,
    pub count: f64,
}

/// Result of a forecast request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub prediction: Vec<ForecastPoint>,
    pub historical: Vec<ForecastPoint>,
}

/// Errors that can occur in the trafficcast core.
#[derive(thiserror::Error, Debug)]
pub enum TrafficError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Model not available: {0}")]
    ModelNotAvailable(String),

    #[error(
        "Insufficient history for source {source_id}: {available} points, need at least {required}"
    )]
    InsufficientHistory {
        source_id: i64,
        available: usize,
        required: usize,
    },

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Convenience result type.
pub type TrafficResult<T> = Result<T, TrafficError>;
