//! Error types for the ingestion daemon.

use trafficcast::TrafficError;

/// All errors that can occur in the daemon.
#[derive(thiserror::Error, Debug)]
pub enum DaemonError {
    #[error("Detector error: {0}")]
    Detector(String),

    #[error("Detector failure for source {source_id}: {reason}")]
    DetectorFailure { source_id: i64, reason: String },

    #[error("Store write failure: {0}")]
    StoreWriteFailure(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Source feed error: {0}")]
    Feed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Traffic(#[from] TrafficError),
}

impl DaemonError {
    /// Whether the process should stop rather than carry on to the next cycle.
    pub fn is_fatal(&self) -> bool {
        match self {
            DaemonError::Detector(_)
            | DaemonError::DetectorFailure { .. }
            | DaemonError::StoreWriteFailure(_)
            | DaemonError::Http(_) => false,
            DaemonError::Configuration(_) | DaemonError::Feed(_) => true,
            DaemonError::Io(_) | DaemonError::Json(_) => true,
            DaemonError::Traffic(e) => matches!(
                e,
                TrafficError::Configuration(_) | TrafficError::ModelNotAvailable(_)
            ),
        }
    }
}

pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_cycle_errors_are_not_fatal() {
        assert!(!DaemonError::DetectorFailure {
            source_id: 1,
            reason: "timeout".to_string()
        }
        .is_fatal());
        assert!(!DaemonError::StoreWriteFailure("disk I/O error".to_string()).is_fatal());
        assert!(DaemonError::Configuration("missing model".to_string()).is_fatal());
        assert!(DaemonError::from(TrafficError::Configuration("x".to_string())).is_fatal());
        assert!(!DaemonError::from(TrafficError::Store("x".to_string())).is_fatal());
    }

    #[test]
    fn test_traffic_errors_are_transparent() {
        let err = DaemonError::from(TrafficError::MalformedRequest("unknown source id 4".into()));
        assert_eq!(err.to_string(), "Malformed request: unknown source id 4");
    }
}
