//! Forecasting model capability and its ONNX Runtime implementation.

use std::path::Path;

use ndarray::{Array2, Array3};
use ort::session::Session;
use ort::value::Tensor;

use crate::types::{TrafficError, TrafficResult};

/// One model call's inputs, all of length `S` and most recent first.
#[derive(Debug, Clone, Copy)]
pub struct ModelInput<'a> {
    pub hour_of_day: &'a [i64],
    pub day_of_week: &'a [i64],
    pub day_of_year: &'a [i64],
    pub lags: &'a [f32],
}

/// A fixed, pre-trained next-step predictor.
///
/// Returns the next value in scaled space.
pub trait Model {
    fn predict(&mut self, input: &ModelInput<'_>) -> TrafficResult<f32>;
}

impl<M: Model + ?Sized> Model for Box<M> {
    fn predict(&mut self, input: &ModelInput<'_>) -> TrafficResult<f32> {
        (**self).predict(input)
    }
}

/// Forecaster exported to ONNX.
///
/// Inputs are fed positionally: hour of day `[1, S]`, day of week `[1, S]`,
/// day of year `[1, S]`, lags `[1, 1, S]`, all as `f32`.
pub struct OnnxModel {
    session: Session,
}

impl OnnxModel {
    /// Load the model from `path`. A missing file is an error; there is no
    /// fallback mode.
    pub fn load(path: &Path) -> TrafficResult<Self> {
        if !path.exists() {
            return Err(TrafficError::ModelNotAvailable(format!(
                "forecast model not found at {}",
                path.display()
            )));
        }

        tracing::info!("Loading forecast model from {}", path.display());

        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| TrafficError::Model(format!("Failed to load ONNX model: {e}")))?;

        tracing::info!("Forecast model loaded successfully");
        Ok(Self { session })
    }
}

fn categorical_tensor(values: &[i64]) -> TrafficResult<Tensor<f32>> {
    let data: Vec<f32> = values.iter().map(|v| *v as f32).collect();
    let array = Array2::from_shape_vec((1, values.len()), data)
        .map_err(|e| TrafficError::Model(format!("Bad categorical shape: {e}")))?;
    Tensor::from_array(array)
        .map_err(|e| TrafficError::Model(format!("Failed to create input tensor: {e}")))
}

impl Model for OnnxModel {
    fn predict(&mut self, input: &ModelInput<'_>) -> TrafficResult<f32> {
        let hour = categorical_tensor(input.hour_of_day)?;
        let weekday = categorical_tensor(input.day_of_week)?;
        let yearday = categorical_tensor(input.day_of_year)?;

        let lags = Array3::from_shape_vec((1, 1, input.lags.len()), input.lags.to_vec())
            .map_err(|e| TrafficError::Model(format!("Bad lag shape: {e}")))?;
        let lags = Tensor::from_array(lags)
            .map_err(|e| TrafficError::Model(format!("Failed to create lag tensor: {e}")))?;

        let outputs = self
            .session
            .run(ort::inputs![hour, weekday, yearday, lags])
            .map_err(|e| TrafficError::Model(format!("ONNX inference failed: {e}")))?;

        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| TrafficError::Model(format!("Failed to extract output: {e}")))?;

        data.first()
            .copied()
            .ok_or_else(|| TrafficError::Model("Model returned an empty tensor".to_string()))
    }
}
