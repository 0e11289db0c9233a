//! Configuration loading and resolution.
//!
//! Every setting resolves as: explicit CLI value, then environment variable,
//! then default. Settings without a safe default (model and scaler paths)
//! fail with a configuration error.

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use trafficcast::{
    ForecastConfig, DEFAULT_FORECAST_LABELS, DEFAULT_TARGET_LABELS, DEFAULT_TIME_ZONE,
};

use crate::types::{DaemonError, DaemonResult};

pub const ENV_DB: &str = "TRAFFICCAST_DB";
pub const ENV_DETECTOR_URL: &str = "TRAFFICCAST_DETECTOR_URL";
pub const ENV_FEED_URL: &str = "TRAFFICCAST_FEED_URL";
pub const ENV_FEED_FILE: &str = "TRAFFICCAST_FEED_FILE";
pub const ENV_FETCH_INTERVAL_SECS: &str = "TRAFFICCAST_FETCH_INTERVAL_SECS";
pub const ENV_MAX_CONCURRENT_DETECTIONS: &str = "TRAFFICCAST_MAX_CONCURRENT_DETECTIONS";
pub const ENV_DETECTOR_TIMEOUT_MS: &str = "TRAFFICCAST_DETECTOR_TIMEOUT_MS";
pub const ENV_TARGET_LABELS: &str = "TRAFFICCAST_TARGET_LABELS";
pub const ENV_FORECAST_LABELS: &str = "TRAFFICCAST_FORECAST_LABELS";
pub const ENV_MODEL: &str = "TRAFFICCAST_MODEL";
pub const ENV_SCALER: &str = "TRAFFICCAST_SCALER";
pub const ENV_HISTORY_STEPS: &str = "PREDICTION_HISTORICAL_TIME_WINDOWS_SIZE";
pub const ENV_TZ: &str = "TRAFFICCAST_TZ";

const DEFAULT_DETECTOR_URL: &str = "http://127.0.0.1:5000/analysis";
const DEFAULT_FEED_URL: &str = "https://data.calgary.ca/api/views/6fv8-ymsc/rows.json";
const DEFAULT_FETCH_INTERVAL_SECS: u64 = 300;
const DEFAULT_DETECTOR_TIMEOUT_MS: u64 = 30_000;

/// Where camera registrations come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedLocation {
    Url(String),
    File(PathBuf),
}

/// Settings for the ingestion loop.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub database_path: PathBuf,
    pub detector_url: String,
    pub detector_timeout: Duration,
    pub feed: FeedLocation,
    pub fetch_interval: Duration,
    pub max_concurrent_detections: usize,
    pub target_labels: Vec<String>,
}

/// CLI overrides for [`IngestConfig`].
#[derive(Debug, Clone, Default)]
pub struct IngestOverrides {
    pub database: Option<String>,
    pub detector_url: Option<String>,
    pub feed_url: Option<String>,
    pub feed_file: Option<String>,
    pub interval_secs: Option<u64>,
    pub max_concurrent: Option<usize>,
}

impl IngestConfig {
    pub fn resolve(overrides: &IngestOverrides) -> DaemonResult<Self> {
        let feed = match (&overrides.feed_file, &overrides.feed_url) {
            (Some(file), _) => FeedLocation::File(PathBuf::from(file)),
            (None, Some(url)) => FeedLocation::Url(url.clone()),
            (None, None) => match read_env_string(ENV_FEED_FILE) {
                Some(file) if !file.is_empty() => FeedLocation::File(PathBuf::from(file)),
                _ => FeedLocation::Url(
                    read_env_string(ENV_FEED_URL)
                        .filter(|u| !u.is_empty())
                        .unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
                ),
            },
        };

        let fetch_interval = overrides
            .interval_secs
            .unwrap_or_else(|| read_env_u64(ENV_FETCH_INTERVAL_SECS, DEFAULT_FETCH_INTERVAL_SECS));
        if fetch_interval == 0 {
            return Err(DaemonError::Configuration(
                "fetch interval must be at least one second".to_string(),
            ));
        }

        Ok(Self {
            database_path: resolve_database_path(overrides.database.as_deref()),
            detector_url: resolve_string(
                overrides.detector_url.as_deref(),
                read_env_string(ENV_DETECTOR_URL),
                DEFAULT_DETECTOR_URL,
            ),
            detector_timeout: Duration::from_millis(read_env_u64(
                ENV_DETECTOR_TIMEOUT_MS,
                DEFAULT_DETECTOR_TIMEOUT_MS,
            )),
            feed,
            fetch_interval: Duration::from_secs(fetch_interval),
            max_concurrent_detections: overrides
                .max_concurrent
                .unwrap_or_else(|| read_env_usize(ENV_MAX_CONCURRENT_DETECTIONS, 1))
                .max(1),
            target_labels: read_env_string(ENV_TARGET_LABELS)
                .map(|raw| parse_label_list(&raw))
                .filter(|labels| !labels.is_empty())
                .unwrap_or_else(|| DEFAULT_TARGET_LABELS.iter().map(|s| s.to_string()).collect()),
        })
    }
}

/// Settings for a forecast request.
#[derive(Debug, Clone)]
pub struct PredictConfig {
    pub database_path: PathBuf,
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
    pub forecast: ForecastConfig,
}

/// CLI overrides for [`PredictConfig`].
#[derive(Debug, Clone, Default)]
pub struct PredictOverrides {
    pub database: Option<String>,
    pub model: Option<String>,
    pub scaler: Option<String>,
    pub history_steps: Option<usize>,
}

impl PredictConfig {
    pub fn resolve(overrides: &PredictOverrides) -> DaemonResult<Self> {
        let model_path = resolve_required_path(
            overrides.model.as_deref(),
            read_env_string(ENV_MODEL),
            "forecast model path (--model or TRAFFICCAST_MODEL)",
        )?;
        let scaler_path = resolve_required_path(
            overrides.scaler.as_deref(),
            read_env_string(ENV_SCALER),
            "scaler path (--scaler or TRAFFICCAST_SCALER)",
        )?;

        let defaults = ForecastConfig::default();
        let history_time_steps = overrides
            .history_steps
            .unwrap_or_else(|| read_env_usize(ENV_HISTORY_STEPS, defaults.history_time_steps));
        if history_time_steps == 0 {
            return Err(DaemonError::Configuration(
                "history window must be at least one step".to_string(),
            ));
        }

        let time_zone = match read_env_string(ENV_TZ).filter(|s| !s.is_empty()) {
            Some(raw) => parse_time_zone(&raw)?,
            None => DEFAULT_TIME_ZONE,
        };

        let labels = read_env_string(ENV_FORECAST_LABELS)
            .map(|raw| parse_label_list(&raw))
            .filter(|labels| !labels.is_empty())
            .unwrap_or_else(|| DEFAULT_FORECAST_LABELS.iter().map(|s| s.to_string()).collect());

        Ok(Self {
            database_path: resolve_database_path(overrides.database.as_deref()),
            model_path,
            scaler_path,
            forecast: ForecastConfig {
                history_time_steps,
                labels,
                time_zone,
                ..defaults
            },
        })
    }
}

/// Resolve the SQLite database path.
pub fn resolve_database_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Some(env_path) = read_env_string(ENV_DB).filter(|p| !p.is_empty()) {
        return PathBuf::from(env_path);
    }

    let cwd_db = PathBuf::from(".trafficcast/traffic.db");
    if cwd_db.exists() {
        return cwd_db;
    }

    resolve_default_database_path()
}

fn resolve_default_database_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    PathBuf::from(home).join(".trafficcast").join("traffic.db")
}

fn resolve_string(explicit: Option<&str>, env: Option<String>, default: &str) -> String {
    explicit
        .map(str::to_string)
        .or(env.filter(|v| !v.is_empty()))
        .unwrap_or_else(|| default.to_string())
}

fn resolve_required_path(
    explicit: Option<&str>,
    env: Option<String>,
    what: &str,
) -> DaemonResult<PathBuf> {
    explicit
        .map(str::to_string)
        .or(env.filter(|v| !v.is_empty()))
        .map(PathBuf::from)
        .ok_or_else(|| DaemonError::Configuration(format!("missing required {what}")))
}

/// Parse an IANA zone name such as `America/Edmonton`.
pub fn parse_time_zone(raw: &str) -> DaemonResult<Tz> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|e| DaemonError::Configuration(format!("invalid time zone '{raw}': {e}")))
}

/// Split a comma-separated label list, trimming blanks.
pub fn parse_label_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn read_env_u64(name: &str, default_value: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default_value)
}

fn read_env_usize(name: &str, default_value: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default_value)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string())
}
