//! HTTP detector tests against a mock detection service.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use trafficcast::{LabelFilter, SqliteConnector, SqliteStore, TimeSeriesStore};
use trafficcast_daemon::{
    DaemonError, Detector, HttpDetector, IngestionScheduler, PersistOutcome, SchedulerConfig,
};

const IMAGE: &str = "http://trafficcam.calgary.ca/loc12.jpg";

fn detector(server: &MockServer) -> HttpDetector {
    HttpDetector::new(format!("{}/analysis", server.uri()), Duration::from_secs(5))
        .unwrap()
        .with_backoff(Duration::from_millis(5))
}

fn car_response() -> serde_json::Value {
    json!({
        "detections": [
            {"label": "car", "confidence": 0.82,
             "topleft": {"x": 100, "y": 40}, "bottomright": {"x": 180, "y": 90}},
            {"label": "traffic light", "confidence": 0.64,
             "topleft": {"x": 5, "y": 5}, "bottomright": {"x": 15, "y": 30}}
        ]
    })
}

#[tokio::test]
async fn test_posts_image_url_and_parses_detections() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analysis"))
        .and(body_json(json!({ "image": IMAGE })))
        .respond_with(ResponseTemplate::new(200).set_body_json(car_response()))
        .expect(1)
        .mount(&server)
        .await;

    let detections = detector(&server).detect(IMAGE).await.unwrap();
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].label, "car");
    assert_eq!(detections[0].topleft.x, 100.0);
}

#[tokio::test]
async fn test_accepts_stringified_detection_list() {
    let server = MockServer::start().await;
    let inner = r#"[{"label":"bus","confidence":"0.71","topleft":{"x":1,"y":1},"bottomright":{"x":9,"y":9}}]"#;
    Mock::given(method("POST"))
        .and(path("/analysis"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "detections": inner })))
        .mount(&server)
        .await;

    let detections = detector(&server).detect(IMAGE).await.unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].label, "bus");
    assert!((detections[0].confidence - 0.71).abs() < 1e-9);
}

#[tokio::test]
async fn test_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(car_response()))
        .expect(1)
        .mount(&server)
        .await;

    let detections = detector(&server).detect(IMAGE).await.unwrap();
    assert_eq!(detections.len(), 2);
}

#[tokio::test]
async fn test_gives_up_after_two_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let err = detector(&server).detect(IMAGE).await.unwrap_err();
    assert!(matches!(err, DaemonError::Detector(_)));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_honors_retry_after_on_429() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "detections": [] })))
        .mount(&server)
        .await;

    let detections = detector(&server).detect(IMAGE).await.unwrap();
    assert!(detections.is_empty());
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    assert!(detector(&server).detect(IMAGE).await.is_err());
}

#[tokio::test]
async fn test_cycle_persists_http_detections_to_sqlite() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analysis"))
        .respond_with(ResponseTemplate::new(200).set_body_json(car_response()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("traffic.db");
    let mut scheduler = IngestionScheduler::new(
        detector(&server),
        SqliteConnector::new(&db_path),
        SchedulerConfig {
            fetch_interval: Duration::from_secs(300),
            max_concurrent_detections: 1,
            labels: LabelFilter::default(),
        },
    );
    scheduler.set_sources(vec![trafficcast::Source {
        id: 12,
        address: "16 Ave / 19 St NE".to_string(),
        image_url: IMAGE.to_string(),
        region: "NE".to_string(),
        latitude: 51.06,
        longitude: -114.0,
    }]);

    let report = scheduler.run_cycle().await;
    assert!(matches!(report.outcome, PersistOutcome::Written(_)));
    assert_eq!(report.observations, 1);

    let store = SqliteStore::open(&db_path).unwrap();
    let points = store.fetch_detection_points(12, "car", 0.3).unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].x_center, 140.0);
    assert_eq!(points[0].y_center, 65.0);
    assert!(store
        .fetch_detection_points(12, "traffic light", 0.0)
        .unwrap()
        .is_empty());
}
