//! Read-only queries against the store: forecasts and object locations.
//!
//! Both open their own connection and never touch the ingestion loop's.

use std::path::Path;

use trafficcast::{
    DetectionPoint, Forecast, LinearScaler, Model, OnnxModel, RecursiveForecaster, SqliteStore,
    TimeSeriesStore, TrafficError,
};

use crate::config::PredictConfig;
use crate::types::DaemonResult;

/// Default confidence cut-off for the location history.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.3;

/// Forecast `steps` buckets for `source_id` with the configured model.
pub fn forecast(config: &PredictConfig, source_id: i64, steps: usize) -> DaemonResult<Forecast> {
    if steps == 0 {
        return Err(
            TrafficError::MalformedRequest("horizon must be at least one step".to_string()).into(),
        );
    }
    let model = OnnxModel::load(&config.model_path)?;
    let scaler = LinearScaler::from_file(&config.scaler_path)?;
    let store = open_existing(&config.database_path)?;
    forecast_with(model, scaler, config, &store, source_id, steps)
}

/// Forecast with an already-loaded model and store.
pub fn forecast_with<M, S>(
    model: M,
    scaler: LinearScaler,
    config: &PredictConfig,
    store: &S,
    source_id: i64,
    steps: usize,
) -> DaemonResult<Forecast>
where
    M: Model,
    S: TimeSeriesStore + ?Sized,
{
    let mut forecaster = RecursiveForecaster::new(model, scaler, config.forecast.clone());
    let forecast = forecaster.predict(store, source_id, steps)?;
    tracing::debug!(
        "Forecast for source {source_id}: {} steps, {} historical points",
        forecast.prediction.len(),
        forecast.historical.len()
    );
    Ok(forecast)
}

/// Stored detection points for one source and label above `min_confidence`.
pub fn object_locations<S: TimeSeriesStore + ?Sized>(
    store: &S,
    source_id: i64,
    label: &str,
    min_confidence: f64,
) -> DaemonResult<Vec<DetectionPoint>> {
    if !store.source_exists(source_id)? {
        return Err(TrafficError::MalformedRequest(format!("unknown source {source_id}")).into());
    }
    Ok(store.fetch_detection_points(source_id, label, min_confidence)?)
}

/// Open a database that ingestion has already created.
pub fn open_existing(path: &Path) -> DaemonResult<SqliteStore> {
    if !path.exists() {
        return Err(TrafficError::Configuration(format!(
            "database not found at {}",
            path.display()
        ))
        .into());
    }
    Ok(SqliteStore::open(path)?)
}
