//! HTTP client for the detection service.
//!
//! POSTs `{"image": <url>}` and reads back a `detections` list. Retries on
//! transport errors and 5xx with exponential backoff; honors `Retry-After`
//! on 429.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use trafficcast::{BoxCorner, RawDetection};

use super::Detector;
use crate::types::{DaemonError, DaemonResult};

const MAX_RETRIES: u32 = 2;
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
const MAX_RETRY_AFTER_SECS: u64 = 10;

/// Detection service reached over HTTP.
#[derive(Clone)]
pub struct HttpDetector {
    client: reqwest::Client,
    endpoint: String,
    backoff_base: Duration,
}

impl HttpDetector {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> DaemonResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("trafficcast/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            backoff_base: DEFAULT_BACKOFF_BASE,
        })
    }

    /// Override the base delay of the exponential backoff.
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.pow(attempt.saturating_sub(1))
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, image_url: &str) -> DaemonResult<Vec<RawDetection>> {
        let mut retries = 0u32;
        let payload = serde_json::json!({ "image": image_url });

        loop {
            let resp = self.client.post(&self.endpoint).json(&payload).send().await;

            match resp {
                Ok(r) => {
                    let status = r.status().as_u16();

                    if status >= 500 && retries < MAX_RETRIES {
                        retries += 1;
                        tracing::debug!("Detector returned {status}, retry {retries}");
                        tokio::time::sleep(self.backoff(retries)).await;
                        continue;
                    }

                    if status == 429 && retries < MAX_RETRIES {
                        retries += 1;
                        let retry_after = r
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.trim().parse::<u64>().ok())
                            .unwrap_or(2);
                        tokio::time::sleep(Duration::from_secs(
                            retry_after.min(MAX_RETRY_AFTER_SECS),
                        ))
                        .await;
                        continue;
                    }

                    if !r.status().is_success() {
                        return Err(DaemonError::Detector(format!(
                            "detection service returned HTTP {status}"
                        )));
                    }

                    let body = r.text().await?;
                    return parse_detection_response(&body);
                }
                Err(e) => {
                    if retries < MAX_RETRIES {
                        retries += 1;
                        tracing::debug!("Detector request failed ({e}), retry {retries}");
                        tokio::time::sleep(self.backoff(retries)).await;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }
}

#[derive(Deserialize)]
struct DetectionResponse {
    #[serde(default)]
    detections: Option<DetectionList>,
}

/// The service sometimes sends the list JSON-encoded inside a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum DetectionList {
    Inline(Vec<WireDetection>),
    Encoded(String),
}

#[derive(Deserialize)]
struct WireDetection {
    label: String,
    confidence: NumberOrString,
    topleft: WireCorner,
    bottomright: WireCorner,
}

#[derive(Deserialize)]
struct WireCorner {
    x: NumberOrString,
    y: NumberOrString,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

impl NumberOrString {
    fn value(&self, field: &str) -> DaemonResult<f64> {
        match self {
            NumberOrString::Number(n) => Ok(*n),
            NumberOrString::Text(s) => s.trim().parse::<f64>().map_err(|_| {
                DaemonError::Detector(format!("non-numeric {field} '{s}' in detection"))
            }),
        }
    }
}

impl WireDetection {
    fn into_raw(self) -> DaemonResult<RawDetection> {
        Ok(RawDetection {
            label: self.label,
            confidence: self.confidence.value("confidence")?,
            topleft: BoxCorner {
                x: self.topleft.x.value("x")?,
                y: self.topleft.y.value("y")?,
            },
            bottomright: BoxCorner {
                x: self.bottomright.x.value("x")?,
                y: self.bottomright.y.value("y")?,
            },
        })
    }
}

/// Decode a detection service response body.
///
/// A missing or null `detections` field means nothing was detected.
pub fn parse_detection_response(body: &str) -> DaemonResult<Vec<RawDetection>> {
    let response: DetectionResponse = serde_json::from_str(body)?;

    let wire = match response.detections {
        None => Vec::new(),
        Some(DetectionList::Inline(list)) => list,
        Some(DetectionList::Encoded(text)) if text.trim().is_empty() => Vec::new(),
        Some(DetectionList::Encoded(text)) => serde_json::from_str(&text)?,
    };

    wire.into_iter().map(WireDetection::into_raw).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inline_detections() {
        let body = r#"{"detections": [
            {"label": "car", "confidence": 0.91,
             "topleft": {"x": 10, "y": 20}, "bottomright": {"x": 30, "y": 60}}
        ]}"#;
        let parsed = parse_detection_response(body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].label, "car");
        assert!((parsed[0].confidence - 0.91).abs() < 1e-9);
        assert_eq!(parsed[0].bottomright.y, 60.0);
    }

    #[test]
    fn test_parse_encoded_detections_with_string_confidence() {
        let inner = r#"[{"label":"bus","confidence":"0.55","topleft":{"x":1,"y":2},"bottomright":{"x":"3","y":4}}]"#;
        let body = serde_json::json!({ "detections": inner }).to_string();
        let parsed = parse_detection_response(&body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].label, "bus");
        assert!((parsed[0].confidence - 0.55).abs() < 1e-9);
        assert_eq!(parsed[0].bottomright.x, 3.0);
    }

    #[test]
    fn test_parse_missing_or_empty_detections() {
        assert!(parse_detection_response("{}").unwrap().is_empty());
        assert!(parse_detection_response(r#"{"detections": null}"#)
            .unwrap()
            .is_empty());
        assert!(parse_detection_response(r#"{"detections": ""}"#)
            .unwrap()
            .is_empty());
        assert!(parse_detection_response(r#"{"detections": []}"#)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_detection_response("not json").is_err());
        let body = r#"{"detections": [{"label": "car", "confidence": "high",
            "topleft": {"x": 0, "y": 0}, "bottomright": {"x": 1, "y": 1}}]}"#;
        assert!(matches!(
            parse_detection_response(body),
            Err(DaemonError::Detector(_))
        ));
    }

    #[test]
    fn test_backoff_doubles() {
        let detector = HttpDetector::new("http://localhost:1/analysis", Duration::from_secs(1))
            .unwrap()
            .with_backoff(Duration::from_millis(100));
        assert_eq!(detector.backoff(1), Duration::from_millis(100));
        assert_eq!(detector.backoff(2), Duration::from_millis(200));
    }
}
