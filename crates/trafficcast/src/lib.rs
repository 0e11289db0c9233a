//! Trafficcast: camera object counts, time-bucketed storage and recursive forecasting.

pub mod aggregate;
pub mod features;
pub mod forecast;
pub mod lag;
pub mod model;
pub mod scaler;
pub mod store;
pub mod types;

pub use aggregate::{aggregate_detections, LabelFilter};
pub use features::{FeatureRow, FeatureWindowBuilder, FeatureWindows, DEFAULT_HISTORY_TIME_STEPS};
pub use forecast::{
    forecast_times, ForecastConfig, RecursiveForecaster, Rollout, StepOutput, DEFAULT_TIME_ZONE,
};
pub use lag::LagBuffer;
pub use model::{Model, ModelInput, OnnxModel};
pub use scaler::LinearScaler;
pub use store::{SqliteConnector, SqliteStore, StoreConnector, TimeSeriesStore};
pub use types::*;
