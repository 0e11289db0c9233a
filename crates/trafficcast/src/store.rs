//! Time-series persistence: the store contract and its SQLite backend.
//!
//! Timestamps are stored as unix seconds. Observations and detection points
//! are append-only; inserts are idempotent against their natural keys. A
//! detection point's key is its position among the points written for the
//! same source and timestamp, so identical boxes in one frame stay distinct.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

use crate::types::{
    CycleBatch, CycleWriteSummary, DetectionPoint, Observation, Source, TrafficError,
    TrafficResult,
};

/// Persistence boundary for sources, observations and detection points.
pub trait TimeSeriesStore {
    /// Remove every registered source.
    fn reset_sources(&mut self) -> TrafficResult<()>;

    fn insert_sources(&mut self, sources: &[Source]) -> TrafficResult<usize>;

    /// Replace the registered sources with `sources`.
    ///
    /// Backends that support transactions make this all-or-nothing.
    fn replace_sources(&mut self, sources: &[Source]) -> TrafficResult<usize> {
        self.reset_sources()?;
        self.insert_sources(sources)
    }

    fn bulk_insert_observations(&mut self, observations: &[Observation]) -> TrafficResult<usize>;

    fn bulk_insert_detection_points(&mut self, points: &[DetectionPoint]) -> TrafficResult<usize>;

    /// Write a whole cycle atomically: either every row is committed or none.
    fn write_cycle(&mut self, batch: &CycleBatch) -> TrafficResult<CycleWriteSummary>;

    fn source_exists(&self, source_id: i64) -> TrafficResult<bool>;

    /// Average observed count per time bucket for `labels`, the `limit` most
    /// recent buckets, returned oldest first.
    fn fetch_recent(
        &self,
        source_id: i64,
        labels: &[String],
        bucket_width: Duration,
        limit: usize,
    ) -> TrafficResult<Vec<(DateTime<Utc>, f64)>>;

    /// Stored object locations for a source and label, oldest first.
    fn fetch_detection_points(
        &self,
        source_id: i64,
        label: &str,
        min_confidence: f64,
    ) -> TrafficResult<Vec<DetectionPoint>>;
}

/// Produces fresh store connections, used for explicit reconnection.
pub trait StoreConnector {
    type Store: TimeSeriesStore;

    fn connect(&self) -> TrafficResult<Self::Store>;
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS source (
        id INTEGER PRIMARY KEY,
        address TEXT NOT NULL,
        image_url TEXT NOT NULL,
        region TEXT NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL
    );
    CREATE TABLE IF NOT EXISTS observation (
        source_id INTEGER NOT NULL,
        time INTEGER NOT NULL,
        label TEXT NOT NULL,
        count INTEGER NOT NULL,
        confidence REAL NOT NULL,
        UNIQUE (source_id, time, label)
    );
    CREATE INDEX IF NOT EXISTS idx_observation_source_time ON observation (source_id, time);
    CREATE TABLE IF NOT EXISTS detection_point (
        source_id INTEGER NOT NULL,
        time INTEGER NOT NULL,
        label TEXT NOT NULL,
        x_top_left REAL NOT NULL,
        y_top_left REAL NOT NULL,
        x_bottom_right REAL NOT NULL,
        y_bottom_right REAL NOT NULL,
        x_center REAL NOT NULL,
        y_center REAL NOT NULL,
        confidence REAL NOT NULL,
        ordinal INTEGER NOT NULL,
        UNIQUE (source_id, time, ordinal)
    );
    CREATE INDEX IF NOT EXISTS idx_detection_point_source_label ON detection_point (source_id, label);
";

/// SQLite-backed [`TimeSeriesStore`].
#[derive(Debug)]
pub struct SqliteStore {
    db: Connection,
}

impl SqliteStore {
    /// Open or create a store at `path`.
    pub fn open(path: &Path) -> TrafficResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Connection::open(path)?;
        db.busy_timeout(StdDuration::from_secs(5))?;
        let mode: String = db.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        tracing::debug!("Opened store {} (journal_mode={mode})", path.display());
        Self::init(db)
    }

    /// A throwaway store, mostly for tests.
    pub fn open_in_memory() -> TrafficResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> TrafficResult<Self> {
        db.execute_batch(SCHEMA)?;
        Ok(Self { db })
    }
}

fn insert_observations(db: &Connection, observations: &[Observation]) -> rusqlite::Result<usize> {
    let mut stmt = db.prepare_cached(
        "INSERT OR IGNORE INTO observation (source_id, time, label, count, confidence)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    let mut written = 0;
    for obs in observations {
        written += stmt.execute(params![
            obs.source_id,
            obs.timestamp.timestamp(),
            obs.label,
            obs.count,
            obs.confidence
        ])?;
    }
    Ok(written)
}

fn insert_detection_points(db: &Connection, points: &[DetectionPoint]) -> rusqlite::Result<usize> {
    let mut stmt = db.prepare_cached(
        "INSERT OR IGNORE INTO detection_point (
            source_id, time, label, x_top_left, y_top_left, x_bottom_right, y_bottom_right,
            x_center, y_center, confidence, ordinal
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    let mut ordinals: HashMap<(i64, i64), i64> = HashMap::new();
    let mut written = 0;
    for p in points {
        let time = p.timestamp.timestamp();
        let ordinal = ordinals.entry((p.source_id, time)).or_insert(0);
        written += stmt.execute(params![
            p.source_id,
            time,
            p.label,
            p.x_top_left,
            p.y_top_left,
            p.x_bottom_right,
            p.y_bottom_right,
            p.x_center,
            p.y_center,
            p.confidence,
            *ordinal
        ])?;
        *ordinal += 1;
    }
    Ok(written)
}

fn insert_source_rows(db: &Connection, sources: &[Source]) -> rusqlite::Result<usize> {
    let mut stmt = db.prepare_cached(
        "INSERT OR REPLACE INTO source (id, address, image_url, region, latitude, longitude)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    let mut written = 0;
    for s in sources {
        written += stmt.execute(params![
            s.id,
            s.address,
            s.image_url,
            s.region,
            s.latitude,
            s.longitude
        ])?;
    }
    Ok(written)
}

fn from_unix(secs: i64) -> TrafficResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| TrafficError::Store(format!("Timestamp out of range: {secs}")))
}

impl TimeSeriesStore for SqliteStore {
    fn reset_sources(&mut self) -> TrafficResult<()> {
        let removed = self.db.execute("DELETE FROM source", [])?;
        tracing::info!("Cleared {removed} registered source(s)");
        Ok(())
    }

    fn insert_sources(&mut self, sources: &[Source]) -> TrafficResult<usize> {
        let tx = self.db.transaction()?;
        let written = insert_source_rows(&tx, sources)?;
        tx.commit()?;
        Ok(written)
    }

    fn replace_sources(&mut self, sources: &[Source]) -> TrafficResult<usize> {
        let tx = self.db.transaction()?;
        let removed = tx.execute("DELETE FROM source", [])?;
        let written = insert_source_rows(&tx, sources)?;
        tx.commit()?;
        tracing::info!("Replaced {removed} registered source(s) with {written}");
        Ok(written)
    }

    fn bulk_insert_observations(&mut self, observations: &[Observation]) -> TrafficResult<usize> {
        let tx = self.db.transaction()?;
        let written = insert_observations(&tx, observations)?;
        tx.commit()?;
        Ok(written)
    }

    fn bulk_insert_detection_points(&mut self, points: &[DetectionPoint]) -> TrafficResult<usize> {
        let tx = self.db.transaction()?;
        let written = insert_detection_points(&tx, points)?;
        tx.commit()?;
        Ok(written)
    }

    fn write_cycle(&mut self, batch: &CycleBatch) -> TrafficResult<CycleWriteSummary> {
        let tx = self.db.transaction()?;
        let observations = insert_observations(&tx, &batch.observations)?;
        let detection_points = insert_detection_points(&tx, &batch.detection_points)?;
        tx.commit()?;
        Ok(CycleWriteSummary {
            observations,
            detection_points,
        })
    }

    fn source_exists(&self, source_id: i64) -> TrafficResult<bool> {
        let exists = self.db.query_row(
            "SELECT EXISTS (SELECT 1 FROM source WHERE id = ?1)",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn fetch_recent(
        &self,
        source_id: i64,
        labels: &[String],
        bucket_width: Duration,
        limit: usize,
    ) -> TrafficResult<Vec<(DateTime<Utc>, f64)>> {
        let width = bucket_width.num_seconds();
        if width <= 0 {
            return Err(TrafficError::Store(format!(
                "Bucket width must be positive, got {width}s"
            )));
        }
        if labels.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let label_slots: Vec<String> = (0..labels.len()).map(|i| format!("?{}", i + 4)).collect();
        let sql = format!(
            "SELECT (time / ?1) * ?1 AS bucket, AVG(count)
             FROM observation
             WHERE source_id = ?2 AND label IN ({})
             GROUP BY bucket
             ORDER BY bucket DESC
             LIMIT ?3",
            label_slots.join(", ")
        );

        let mut values = vec![
            Value::Integer(width),
            Value::Integer(source_id),
            Value::Integer(limit as i64),
        ];
        values.extend(labels.iter().cloned().map(Value::Text));

        let mut stmt = self.db.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut points = rows
            .into_iter()
            .map(|(bucket, avg)| Ok((from_unix(bucket)?, avg)))
            .collect::<TrafficResult<Vec<_>>>()?;
        points.reverse();
        Ok(points)
    }

    fn fetch_detection_points(
        &self,
        source_id: i64,
        label: &str,
        min_confidence: f64,
    ) -> TrafficResult<Vec<DetectionPoint>> {
        let mut stmt = self.db.prepare(
            "SELECT source_id, time, label, x_top_left, y_top_left, x_bottom_right,
                    y_bottom_right, x_center, y_center, confidence
             FROM detection_point
             WHERE source_id = ?1 AND label = ?2 AND confidence > ?3
             ORDER BY time, ordinal",
        )?;
        let rows = stmt
            .query_map(params![source_id, label, min_confidence], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    [
                        row.get::<_, f64>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, f64>(6)?,
                        row.get::<_, f64>(7)?,
                        row.get::<_, f64>(8)?,
                        row.get::<_, f64>(9)?,
                    ],
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(source_id, time, label, v)| {
                Ok(DetectionPoint {
                    source_id,
                    timestamp: from_unix(time)?,
                    label,
                    x_top_left: v[0],
                    y_top_left: v[1],
                    x_bottom_right: v[2],
                    y_bottom_right: v[3],
                    x_center: v[4],
                    y_center: v[5],
                    confidence: v[6],
                })
            })
            .collect()
    }
}

/// Opens [`SqliteStore`] connections to a database file.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreConnector for SqliteConnector {
    type Store = SqliteStore;

    fn connect(&self) -> TrafficResult<SqliteStore> {
        SqliteStore::open(&self.path)
    }
}
