//! Object detection capability.

pub mod http;

use async_trait::async_trait;
use trafficcast::RawDetection;

use crate::types::DaemonResult;

pub use http::{parse_detection_response, HttpDetector};

/// Runs object detection on one camera image.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, image_url: &str) -> DaemonResult<Vec<RawDetection>>;
}

#[async_trait]
impl<D: Detector + ?Sized> Detector for std::sync::Arc<D> {
    async fn detect(&self, image_url: &str) -> DaemonResult<Vec<RawDetection>> {
        (**self).detect(image_url).await
    }
}
