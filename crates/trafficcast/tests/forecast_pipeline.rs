//! Store-to-forecast pipeline against an on-disk SQLite database.

use chrono::{DateTime, Duration, TimeZone, Utc};

use trafficcast::{
    ForecastConfig, LinearScaler, Model, ModelInput, Observation, RecursiveForecaster, Source,
    SqliteStore, TimeSeriesStore, TrafficError, TrafficResult,
};

/// Predicts the newest lag plus one.
struct NextIsNewestPlusOne;

impl Model for NextIsNewestPlusOne {
    fn predict(&mut self, input: &ModelInput<'_>) -> TrafficResult<f32> {
        Ok(input.lags[0] + 1.0)
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
}

fn source(id: i64) -> Source {
    Source {
        id,
        address: format!("Camera {id}"),
        image_url: format!("http://cams/loc{id}.jpg"),
        region: "SW".to_string(),
        latitude: 51.0,
        longitude: -114.1,
    }
}

fn seed(store: &mut SqliteStore, source_id: i64, counts: &[i64]) {
    let observations: Vec<Observation> = counts
        .iter()
        .enumerate()
        .map(|(k, count)| Observation {
            source_id,
            timestamp: t0() + Duration::minutes(15 * k as i64),
            label: "car".to_string(),
            count: *count,
            confidence: 0.8,
        })
        .collect();
    store.bulk_insert_observations(&observations).unwrap();
}

fn config() -> ForecastConfig {
    ForecastConfig {
        history_time_steps: 3,
        time_zone: chrono_tz::America::Edmonton,
        ..ForecastConfig::default()
    }
}

fn open_seeded(dir: &tempfile::TempDir) -> SqliteStore {
    let mut store = SqliteStore::open(&dir.path().join("traffic.db")).unwrap();
    store.insert_sources(&[source(1), source(2)]).unwrap();
    seed(&mut store, 1, &[10, 12, 11, 13, 9, 14, 8, 15]);
    seed(&mut store, 2, &[4, 5, 6]);
    store
}

#[test]
fn test_forecast_feeds_predictions_back() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_seeded(&dir);

    let mut forecaster =
        RecursiveForecaster::new(NextIsNewestPlusOne, LinearScaler::identity(), config());
    let forecast = forecaster.predict(&store, 1, 2).unwrap();

    // The newest bucket is the 15 at t0+105m; the window is [15, 8, 14].
    let counts: Vec<f64> = forecast.prediction.iter().map(|p| p.count).collect();
    assert_eq!(counts, vec![16.0, 17.0]);

    let times: Vec<&str> = forecast.prediction.iter().map(|p| p.time.as_str()).collect();
    assert_eq!(
        times,
        vec!["2024-03-04T07:00:00-07:00", "2024-03-04T07:15:00-07:00"]
    );
}

#[test]
fn test_forecast_historical_slice_is_most_recent_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_seeded(&dir);

    let mut forecaster =
        RecursiveForecaster::new(NextIsNewestPlusOne, LinearScaler::identity(), config());
    let forecast = forecaster.predict(&store, 1, 1).unwrap();

    let historical: Vec<(&str, f64)> = forecast
        .historical
        .iter()
        .map(|p| (p.time.as_str(), p.count))
        .collect();
    assert_eq!(
        historical,
        vec![
            ("2024-03-04T06:30:00-07:00", 11.5),
            ("2024-03-04T06:00:00-07:00", 11.5),
            ("2024-03-04T05:30:00-07:00", 12.0),
            ("2024-03-04T05:00:00-07:00", 11.0),
        ]
    );
}

#[test]
fn test_forecast_reports_unscaled_values() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_seeded(&dir);

    // Scaled lags are (x - 10) / 2; the model adds one in scaled space.
    let scaler = LinearScaler::new(10.0, 2.0);
    let mut forecaster = RecursiveForecaster::new(NextIsNewestPlusOne, scaler, config());
    let forecast = forecaster.predict(&store, 1, 2).unwrap();

    let counts: Vec<f64> = forecast.prediction.iter().map(|p| p.count).collect();
    assert_eq!(counts, vec![17.0, 19.0]);
}

#[test]
fn test_forecast_rejects_bad_requests() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_seeded(&dir);
    let mut forecaster =
        RecursiveForecaster::new(NextIsNewestPlusOne, LinearScaler::identity(), config());

    assert!(matches!(
        forecaster.predict(&store, 1, 0),
        Err(TrafficError::MalformedRequest(_))
    ));
    assert!(matches!(
        forecaster.predict(&store, 42, 3),
        Err(TrafficError::MalformedRequest(_))
    ));
    assert!(matches!(
        forecaster.predict(&store, 2, 3),
        Err(TrafficError::InsufficientHistory {
            source_id: 2,
            available: 3,
            required: 4,
        })
    ));
}

#[test]
fn test_forecast_after_more_cycles_uses_newer_anchor() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_seeded(&dir);
    let mut forecaster =
        RecursiveForecaster::new(NextIsNewestPlusOne, LinearScaler::identity(), config());
    let before = forecaster.predict(&store, 1, 1).unwrap();

    store
        .bulk_insert_observations(&[Observation {
            source_id: 1,
            timestamp: t0() + Duration::minutes(120),
            label: "bus".to_string(),
            count: 20,
            confidence: 0.9,
        }])
        .unwrap();
    let after = forecaster.predict(&store, 1, 1).unwrap();

    assert_eq!(before.prediction[0].time, "2024-03-04T07:00:00-07:00");
    assert_eq!(after.prediction[0].time, "2024-03-04T07:15:00-07:00");
    // The new bucket leads the window: [20, 15, 8].
    assert_eq!(after.prediction[0].count, 21.0);
}
