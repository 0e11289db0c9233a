//! Periodic ingestion: detect, aggregate, persist.
//!
//! Each cycle asks the detector about every registered source, folds the
//! allowed detections into one [`CycleBatch`] and writes it in a single
//! transaction. Detector failures only cost the affected source; a failed
//! write drops the batch and the connection, then reconnects once.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tokio::sync::Notify;
use trafficcast::{
    aggregate_detections, CycleBatch, CycleWriteSummary, LabelFilter, Source, StoreConnector,
    TimeSeriesStore,
};

use crate::detector::Detector;
use crate::feed::SourceFeed;
use crate::types::{DaemonError, DaemonResult};

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub fetch_interval: Duration,
    /// Upper bound on in-flight detector calls. `1` means serial.
    pub max_concurrent_detections: usize,
    pub labels: LabelFilter,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fetch_interval: Duration::from_secs(300),
            max_concurrent_detections: 1,
            labels: LabelFilter::default(),
        }
    }
}

/// What happened to a cycle's batch.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Written(CycleWriteSummary),
    /// Nothing to write.
    Empty,
    /// The write failed or no connection was available; the batch is gone.
    Dropped { reason: String },
}

/// Summary of one ingestion cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub sources: usize,
    pub failed_sources: Vec<i64>,
    pub observations: usize,
    pub detection_points: usize,
    pub outcome: PersistOutcome,
}

/// Ingestion loop state: detector, store connection and registered sources.
pub struct IngestionScheduler<D: Detector, C: StoreConnector> {
    detector: D,
    connector: C,
    store: Option<C::Store>,
    sources: Vec<Source>,
    config: SchedulerConfig,
    cycles: u64,
}

impl<D: Detector, C: StoreConnector> IngestionScheduler<D, C> {
    /// Create the scheduler and try to open a store connection.
    ///
    /// A failed initial connection is not fatal here; the first write or
    /// [`register_sources`](Self::register_sources) retries it.
    pub fn new(detector: D, connector: C, config: SchedulerConfig) -> Self {
        let store = match connector.connect() {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!("Initial store connection failed: {e}");
                None
            }
        };

        Self {
            detector,
            connector,
            store,
            sources: Vec::new(),
            config,
            cycles: 0,
        }
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn is_connected(&self) -> bool {
        self.store.is_some()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Load sources from `feed` and replace the store's source table.
    pub async fn register_sources<F>(&mut self, feed: &F) -> DaemonResult<usize>
    where
        F: SourceFeed + ?Sized,
    {
        let sources = feed.load().await?;
        if self.store.is_none() {
            self.reconnect()?;
        }
        let store = self
            .store
            .as_mut()
            .ok_or_else(|| DaemonError::StoreWriteFailure("no store connection".to_string()))?;

        let inserted = store.replace_sources(&sources)?;
        tracing::info!("Registered {inserted} sources");
        self.sources = sources;
        Ok(inserted)
    }

    /// Replace the registered sources without touching the store.
    pub fn set_sources(&mut self, sources: Vec<Source>) {
        self.sources = sources;
    }

    /// Drop the current connection and open a new one.
    pub fn reconnect(&mut self) -> DaemonResult<()> {
        self.store = None;
        match self.connector.connect() {
            Ok(store) => {
                tracing::info!("Store connection re-established");
                self.store = Some(store);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Store reconnection failed: {e}");
                Err(e.into())
            }
        }
    }

    /// Run detection for every source and aggregate the results.
    ///
    /// Returns the batch and the ids of sources whose detector call failed.
    pub async fn collect_cycle(&self, timestamp: DateTime<Utc>) -> (CycleBatch, Vec<i64>) {
        let detector = &self.detector;
        let results: Vec<_> = stream::iter(self.sources.iter())
            .map(|source| async move {
                let result = AssertUnwindSafe(detector.detect(&source.image_url))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(DaemonError::Detector(format!(
                            "detector panicked: {}",
                            panic_message(panic.as_ref())
                        )))
                    });
                (source.id, result)
            })
            .buffered(self.config.max_concurrent_detections.max(1))
            .collect()
            .await;

        let mut batch = CycleBatch::new();
        let mut failed = Vec::new();
        for (source_id, result) in results {
            match result {
                Ok(detections) => {
                    let part =
                        aggregate_detections(source_id, timestamp, &detections, &self.config.labels);
                    tracing::debug!(
                        "Source {source_id}: {} detections, {} labels kept",
                        detections.len(),
                        part.observations.len()
                    );
                    batch.extend(part);
                }
                Err(e) => {
                    let failure = DaemonError::DetectorFailure {
                        source_id,
                        reason: e.to_string(),
                    };
                    tracing::warn!("{failure}");
                    failed.push(source_id);
                }
            }
        }

        (batch, failed)
    }

    /// Write `batch` once. Never retries the batch.
    pub fn persist(&mut self, batch: &CycleBatch) -> PersistOutcome {
        if batch.is_empty() {
            return PersistOutcome::Empty;
        }

        if self.store.is_none() {
            if let Err(e) = self.reconnect() {
                return PersistOutcome::Dropped {
                    reason: e.to_string(),
                };
            }
        }

        let Some(store) = self.store.as_mut() else {
            return PersistOutcome::Dropped {
                reason: "no store connection".to_string(),
            };
        };

        match store.write_cycle(batch) {
            Ok(summary) => PersistOutcome::Written(summary),
            Err(e) => {
                let failure = DaemonError::StoreWriteFailure(e.to_string());
                tracing::error!("{failure}; dropping batch");
                let _ = self.reconnect();
                PersistOutcome::Dropped {
                    reason: failure.to_string(),
                }
            }
        }
    }

    /// One full cycle: detect, aggregate, persist.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycles += 1;
        let timestamp = Utc::now();

        let (batch, failed_sources) = self.collect_cycle(timestamp).await;
        let outcome = self.persist(&batch);

        CycleReport {
            cycle: self.cycles,
            timestamp,
            sources: self.sources.len(),
            failed_sources,
            observations: batch.observations.len(),
            detection_points: batch.detection_points.len(),
            outcome,
        }
    }

    /// Run cycles until `shutdown` is notified. Returns the number of cycles
    /// started.
    pub async fn run(&mut self, shutdown: Arc<Notify>) -> u64 {
        let period = self.config.fetch_interval;
        tracing::info!(
            "Ingestion loop started: sources={} interval={}s concurrency={}",
            self.sources.len(),
            period.as_secs(),
            self.config.max_concurrent_detections
        );
        let mut started_cycles = 0u64;

        loop {
            let started = Instant::now();
            started_cycles += 1;

            match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
                Ok(report) => log_report(&report),
                Err(panic) => {
                    tracing::error!(
                        "Cycle {started_cycles} panicked at {}: {}",
                        Utc::now().to_rfc3339(),
                        panic_message(panic.as_ref())
                    );
                }
            }

            let sleep = sleep_duration(period, started.elapsed());
            tracing::info!("Next cycle in {:.1}s", sleep.as_secs_f64());

            tokio::select! {
                biased;
                _ = shutdown.notified() => {
                    tracing::info!("Ingestion loop stopping");
                    break;
                }
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        started_cycles
    }
}

/// Time left in the period; zero once the cycle overran it.
pub fn sleep_duration(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

fn log_report(report: &CycleReport) {
    match &report.outcome {
        PersistOutcome::Written(summary) => tracing::info!(
            "Cycle {} at {}: {} sources, {} failed, wrote {} observations and {} detection points",
            report.cycle,
            report.timestamp.to_rfc3339(),
            report.sources,
            report.failed_sources.len(),
            summary.observations,
            summary.detection_points
        ),
        PersistOutcome::Empty => tracing::info!(
            "Cycle {} at {}: {} sources, {} failed, nothing to write",
            report.cycle,
            report.timestamp.to_rfc3339(),
            report.sources,
            report.failed_sources.len()
        ),
        PersistOutcome::Dropped { reason } => tracing::info!(
            "Cycle {} at {}: dropped {} observations ({reason})",
            report.cycle,
            report.timestamp.to_rfc3339(),
            report.observations
        ),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
