//! Linear scaler matching the forecaster's training distribution.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{TrafficError, TrafficResult};

/// Standardizing scaler: `z = (x - mean) / scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearScaler {
    mean: f64,
    scale: f64,
}

/// On-disk form; accepts scalars or single-element arrays per field.
#[derive(Debug, Serialize, Deserialize)]
struct ScalerFile {
    mean: ScalarOrVec,
    scale: ScalarOrVec,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ScalarOrVec {
    Scalar(f64),
    Vec(Vec<f64>),
}

impl ScalarOrVec {
    fn first(&self, field: &str) -> TrafficResult<f64> {
        match self {
            ScalarOrVec::Scalar(v) => Ok(*v),
            ScalarOrVec::Vec(v) => v.first().copied().ok_or_else(|| {
                TrafficError::Configuration(format!("Scaler field '{field}' is empty"))
            }),
        }
    }
}

impl LinearScaler {
    /// Create a scaler. A zero scale is treated as one.
    pub fn new(mean: f64, scale: f64) -> Self {
        let scale = if scale == 0.0 { 1.0 } else { scale };
        Self { mean, scale }
    }

    /// A scaler that leaves values unchanged.
    pub fn identity() -> Self {
        Self::new(0.0, 1.0)
    }

    /// Load scaler parameters from a JSON file.
    pub fn from_file(path: &Path) -> TrafficResult<Self> {
        if !path.exists() {
            return Err(TrafficError::Configuration(format!(
                "Scaler file not found at {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> TrafficResult<Self> {
        let file: ScalerFile = serde_json::from_str(data)?;
        Ok(Self::new(file.mean.first("mean")?, file.scale.first("scale")?))
    }

    pub fn transform(&self, raw: f64) -> f64 {
        (raw - self.mean) / self.scale
    }

    pub fn inverse_transform(&self, scaled: f64) -> f64 {
        scaled * self.scale + self.mean
    }
}
