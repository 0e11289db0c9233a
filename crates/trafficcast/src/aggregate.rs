//! Per-cycle aggregation of raw detections into label counts.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::types::{CycleBatch, DetectionPoint, Observation, RawDetection};

/// Allow-list of object classes that survive aggregation.
#[derive(Debug, Clone)]
pub struct LabelFilter {
    labels: HashSet<String>,
}

impl LabelFilter {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for LabelFilter {
    fn default() -> Self {
        Self::new(crate::types::DEFAULT_TARGET_LABELS)
    }
}

/// Group one source's detections by label.
///
/// Returns one [`Observation`] per allowed label seen (count and mean
/// confidence) plus a [`DetectionPoint`] per allowed detection. Labels are
/// emitted in lexical order so batches are deterministic.
pub fn aggregate_detections(
    source_id: i64,
    timestamp: DateTime<Utc>,
    detections: &[RawDetection],
    filter: &LabelFilter,
) -> CycleBatch {
    let mut groups: BTreeMap<&str, (i64, f64)> = BTreeMap::new();
    let mut detection_points = Vec::new();

    for det in detections.iter().filter(|d| filter.allows(&d.label)) {
        let entry = groups.entry(det.label.as_str()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += det.confidence;
        detection_points.push(DetectionPoint::from_raw(source_id, timestamp, det));
    }

    let observations = groups
        .into_iter()
        .map(|(label, (count, confidence_sum))| Observation {
            source_id,
            timestamp,
            label: label.to_string(),
            count,
            confidence: confidence_sum / count as f64,
        })
        .collect();

    CycleBatch {
        observations,
        detection_points,
    }
}
