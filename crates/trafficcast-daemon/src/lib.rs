//! Trafficcast daemon: camera ingestion loop and forecast commands.

pub mod config;
pub mod detector;
pub mod feed;
pub mod query;
pub mod scheduler;
pub mod types;

pub use config::{resolve_database_path, IngestConfig, PredictConfig};
pub use detector::{Detector, HttpDetector};
pub use feed::{JsonFileFeed, OpenDataFeed, SourceFeed};
pub use scheduler::{CycleReport, IngestionScheduler, PersistOutcome, SchedulerConfig};
pub use types::{DaemonError, DaemonResult};
