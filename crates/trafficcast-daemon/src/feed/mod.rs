//! Camera registration feeds.
//!
//! Sources come either from a local JSON file (an array of [`Source`]
//! objects) or from the city's open-data camera listing in Socrata
//! `rows.json` form.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use trafficcast::Source;

use crate::config::FeedLocation;
use crate::types::{DaemonError, DaemonResult};

const COL_ADDRESS: usize = 8;
const COL_REGION: usize = 9;
const COL_IMAGE: usize = 10;
const COL_LONGITUDE: usize = 11;
const COL_LATITUDE: usize = 12;

/// Produces the list of cameras to poll.
#[async_trait]
pub trait SourceFeed: Send + Sync {
    async fn load(&self) -> DaemonResult<Vec<Source>>;
}

/// Sources listed in a local JSON file.
pub struct JsonFileFeed {
    path: PathBuf,
}

impl JsonFileFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SourceFeed for JsonFileFeed {
    async fn load(&self) -> DaemonResult<Vec<Source>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            DaemonError::Feed(format!("cannot read {}: {e}", self.path.display()))
        })?;
        let sources: Vec<Source> = serde_json::from_str(&raw).map_err(|e| {
            DaemonError::Feed(format!("invalid source list in {}: {e}", self.path.display()))
        })?;
        tracing::info!("Loaded {} sources from {}", sources.len(), self.path.display());
        Ok(sources)
    }
}

/// Sources fetched from an open-data `rows.json` endpoint.
pub struct OpenDataFeed {
    client: reqwest::Client,
    url: String,
}

impl OpenDataFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> DaemonResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl SourceFeed for OpenDataFeed {
    async fn load(&self) -> DaemonResult<Vec<Source>> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DaemonError::Feed(format!("fetching {}: {e}", self.url)))?;
        if !resp.status().is_success() {
            return Err(DaemonError::Feed(format!(
                "{} returned HTTP {}",
                self.url,
                resp.status().as_u16()
            )));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| DaemonError::Feed(format!("decoding {}: {e}", self.url)))?;

        let sources = parse_open_data_rows(&body)?;
        tracing::info!("Loaded {} sources from {}", sources.len(), self.url);
        Ok(sources)
    }
}

/// Build the feed selected by configuration.
pub fn feed_for(location: &FeedLocation, timeout: Duration) -> DaemonResult<Box<dyn SourceFeed>> {
    Ok(match location {
        FeedLocation::File(path) => Box::new(JsonFileFeed::new(path.clone())),
        FeedLocation::Url(url) => Box::new(OpenDataFeed::new(url.clone(), timeout)?),
    })
}

/// Extract sources from a Socrata `rows.json` document.
///
/// Rows that cannot be interpreted are skipped with a warning; a document
/// without a `data` array is an error.
pub fn parse_open_data_rows(doc: &Value) -> DaemonResult<Vec<Source>> {
    let rows = doc
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| DaemonError::Feed("open-data document has no 'data' array".to_string()))?;

    let mut sources = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        match parse_row(row) {
            Some(source) => sources.push(source),
            None => tracing::warn!("Skipping malformed camera row {i}"),
        }
    }
    Ok(sources)
}

fn parse_row(row: &Value) -> Option<Source> {
    let image_url = row.get(COL_IMAGE)?.get(0)?.as_str()?.to_string();
    Some(Source {
        id: camera_id_from_url(&image_url)?,
        address: row.get(COL_ADDRESS)?.as_str()?.to_string(),
        region: row.get(COL_REGION)?.as_str().unwrap_or_default().to_string(),
        latitude: number(row.get(COL_LATITUDE)?)?,
        longitude: number(row.get(COL_LONGITUDE)?)?,
        image_url,
    })
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Camera id encoded in an image URL such as `http://host/loc42.jpg`.
pub fn camera_id_from_url(url: &str) -> Option<i64> {
    let file = url.rsplit('/').next()?;
    let stem = file.split('.').next()?;
    stem.strip_prefix("loc")?.parse().ok()
}
