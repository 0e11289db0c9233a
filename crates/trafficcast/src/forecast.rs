//! Recursive multi-step forecasting.
//!
//! The model predicts one bucket ahead. Each raw (scaled) prediction is fed
//! back as the newest lag for the next step, while the reported values are
//! unscaled. The starting window ends at the newest observed bucket, and its
//! calendar windows stay fixed for the whole horizon.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::features::{FeatureRow, FeatureWindowBuilder, DEFAULT_HISTORY_TIME_STEPS};
use crate::lag::LagBuffer;
use crate::model::{Model, ModelInput};
use crate::scaler::LinearScaler;
use crate::store::TimeSeriesStore;
use crate::types::{
    Forecast, ForecastPoint, TrafficError, TrafficResult, DEFAULT_FORECAST_LABELS,
};

/// Zone used to localize timestamps and calendar features.
pub const DEFAULT_TIME_ZONE: Tz = chrono_tz::America::Edmonton;

/// Forecasting parameters.
#[derive(Debug, Clone)]
pub struct ForecastConfig {
    /// Lag window size `S`.
    pub history_time_steps: usize,
    /// Bucket width of the forecast signal.
    pub interval: Duration,
    /// Labels averaged into the signal.
    pub labels: Vec<String>,
    /// Bucket width of the historical slice returned alongside a forecast.
    pub historical_bucket: Duration,
    /// Number of historical buckets returned.
    pub historical_limit: usize,
    pub time_zone: Tz,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            history_time_steps: DEFAULT_HISTORY_TIME_STEPS,
            interval: Duration::minutes(15),
            labels: DEFAULT_FORECAST_LABELS.iter().map(|s| s.to_string()).collect(),
            historical_bucket: Duration::minutes(30),
            historical_limit: 24,
            time_zone: DEFAULT_TIME_ZONE,
        }
    }
}

/// Output of one recursive step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    /// Model output in scaled space; this is what feeds back.
    pub raw: f32,
    /// Unscaled value reported to callers.
    pub reported: f64,
}

/// All steps of a rollout plus the final lag state.
#[derive(Debug, Clone)]
pub struct Rollout {
    pub steps: Vec<StepOutput>,
    pub lags: LagBuffer,
}

/// Drives a fixed model across a forecast horizon.
pub struct RecursiveForecaster<M: Model> {
    model: M,
    scaler: LinearScaler,
    builder: FeatureWindowBuilder,
    config: ForecastConfig,
}

impl<M: Model> RecursiveForecaster<M> {
    pub fn new(model: M, scaler: LinearScaler, config: ForecastConfig) -> Self {
        let builder = FeatureWindowBuilder::new(config.history_time_steps, config.time_zone);
        Self {
            model,
            scaler,
            builder,
            config,
        }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Forecast `horizon_steps` buckets ahead for `source_id`.
    pub fn predict<S: TimeSeriesStore + ?Sized>(
        &mut self,
        store: &S,
        source_id: i64,
        horizon_steps: usize,
    ) -> TrafficResult<Forecast> {
        if horizon_steps == 0 {
            return Err(TrafficError::MalformedRequest(
                "horizon must be at least one step".to_string(),
            ));
        }
        if !store.source_exists(source_id)? {
            return Err(TrafficError::MalformedRequest(format!(
                "unknown source id {source_id}"
            )));
        }

        let state = self.initial_state(store, source_id)?;
        let rollout = self.roll_forward(&state, horizon_steps)?;
        let times = forecast_times(
            state.anchor,
            self.config.interval,
            horizon_steps,
            self.config.time_zone,
        );

        let prediction = times
            .into_iter()
            .zip(&rollout.steps)
            .map(|(time, step)| ForecastPoint {
                time: time.to_rfc3339(),
                count: step.reported,
            })
            .collect();

        let historical = self.historical(store, source_id)?;

        tracing::debug!(
            "Forecast for source {source_id}: {horizon_steps} step(s) from anchor {}",
            state.anchor
        );

        Ok(Forecast {
            prediction,
            historical,
        })
    }

    /// Build the starting feature row from the store's recent history.
    pub fn initial_state<S: TimeSeriesStore + ?Sized>(
        &self,
        store: &S,
        source_id: i64,
    ) -> TrafficResult<FeatureRow> {
        let history = store.fetch_recent(
            source_id,
            &self.config.labels,
            self.config.interval,
            2 * self.builder.window(),
        )?;

        let scaled: Vec<(DateTime<Utc>, f64)> = history
            .iter()
            .map(|(ts, value)| (*ts, self.scaler.transform(*value)))
            .collect();

        self.builder
            .next_row(&scaled)
            .ok_or(TrafficError::InsufficientHistory {
                source_id,
                available: history.len(),
                required: self.builder.min_points(),
            })
    }

    /// Run the model `steps` times, feeding each raw output back as a lag.
    pub fn roll_forward(&mut self, state: &FeatureRow, steps: usize) -> TrafficResult<Rollout> {
        let mut lags = LagBuffer::new(state.lags.iter().copied());
        let mut outputs = Vec::with_capacity(steps);

        for _ in 0..steps {
            let current = lags.to_vec();
            let raw = self.model.predict(&ModelInput {
                hour_of_day: &state.hour_of_day,
                day_of_week: &state.day_of_week,
                day_of_year: &state.day_of_year,
                lags: &current,
            })?;
            outputs.push(StepOutput {
                raw,
                reported: self.scaler.inverse_transform(f64::from(raw)),
            });
            lags.push_front(raw);
        }

        Ok(Rollout {
            steps: outputs,
            lags,
        })
    }

    fn historical<S: TimeSeriesStore + ?Sized>(
        &self,
        store: &S,
        source_id: i64,
    ) -> TrafficResult<Vec<ForecastPoint>> {
        let mut points = store.fetch_recent(
            source_id,
            &self.config.labels,
            self.config.historical_bucket,
            self.config.historical_limit,
        )?;
        points.reverse();
        Ok(points
            .into_iter()
            .map(|(ts, count)| ForecastPoint {
                time: ts.with_timezone(&self.config.time_zone).to_rfc3339(),
                count,
            })
            .collect())
    }
}

/// Timestamps `anchor + i * interval` for `i = 1..=steps`, localized.
pub fn forecast_times(
    anchor: DateTime<Utc>,
    interval: Duration,
    steps: usize,
    time_zone: Tz,
) -> Vec<DateTime<Tz>> {
    (1..=steps as i32)
        .map(|i| (anchor + interval * i).with_timezone(&time_zone))
        .collect()
}
