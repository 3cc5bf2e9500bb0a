//! SQLite statistics sink.
//!
//! Four append-only tables, one row type per table. `StatsRecorder` owns a
//! small connection pool and writes synchronously; `StatsWriter` puts the
//! recorder behind an unbounded channel drained on the blocking pool, so
//! the measurement path never waits on the database. A failed insert is
//! logged and the row is discarded; the in-memory counters it was sampled
//! from are unaffected.

use log::{error, info};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RecorderResult<T> = Result<T, RecorderError>;

/// One row of the `drops` table: stream-wide totals at a sample instant.
#[derive(Debug, Clone, PartialEq)]
pub struct DropsRow {
    pub packets_dropped: u64,
    pub packets_total: u64,
    pub duplicates: u64,
    /// Receive rate over the last sampling interval, gigabits per second.
    pub media_rate: f32,
    pub timestamp_ns: i64,
}

/// One row of the `bursts` table: a flowlet burst, observed inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstRow {
    pub port: u16,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub burst_errors: u64,
    pub burst_length: u64,
    pub timestamp_ns: i64,
}

/// One row of the `sbursts` table: a stream-level drop burst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBurstRow {
    pub burst_length: u64,
    pub timestamp_ns: i64,
}

/// One row of the `flows` table: a flowlet's continuity counters at a
/// sample instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRow {
    pub port: u16,
    pub burst_count: u64,
    pub reverses: u64,
    pub duplicates: u64,
    pub longest_burst: u64,
    pub seq_breaks: u64,
    pub timestamp_ns: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatsRow {
    Drops(DropsRow),
    Burst(BurstRow),
    StreamBurst(StreamBurstRow),
    Flow(FlowRow),
}

impl StatsRow {
    pub fn table(&self) -> &'static str {
        match self {
            StatsRow::Drops(_) => "drops",
            StatsRow::Burst(_) => "bursts",
            StatsRow::StreamBurst(_) => "sbursts",
            StatsRow::Flow(_) => "flows",
        }
    }
}

pub struct StatsRecorder {
    pool: Pool<SqliteConnectionManager>,
}

impl StatsRecorder {
    /// Creates a fresh statistics database at `path`, replacing any file
    /// left behind by a previous run. Failure here is fatal to the caller;
    /// every later failure is per-row.
    pub fn create(path: impl AsRef<Path>) -> RecorderResult<Self> {
        let path = path.as_ref();
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA temp_store = MEMORY;
                ",
            )
        });
        let pool = Pool::builder().max_size(2).build(manager)?;

        let recorder = Self { pool };
        recorder.init_schema()?;
        info!("statistics database created at {}", path.display());
        Ok(recorder)
    }

    fn init_schema(&self) -> RecorderResult<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "
            CREATE TABLE drops (
                x INTEGER PRIMARY KEY ASC,
                packets_dropped NUMERIC,
                packets_total   NUMERIC,
                duplicates      NUMERIC,
                media_rate      REAL,
                timestamp       NUMERIC
            );

            CREATE TABLE bursts (
                x INTEGER PRIMARY KEY ASC,
                port             INTEGER,
                packets_received NUMERIC,
                bytes_received   NUMERIC,
                burst_errors     INTEGER,
                burst_length     INTEGER,
                timestamp        NUMERIC
            );

            CREATE TABLE sbursts (
                x INTEGER PRIMARY KEY ASC,
                burst_length INTEGER,
                timestamp    NUMERIC
            );

            CREATE TABLE flows (
                x INTEGER PRIMARY KEY ASC,
                port            INTEGER,
                burst_count     INTEGER,
                reverses        NUMERIC,
                duplicates      NUMERIC,
                longest_burst   NUMERIC,
                sequence_breaks NUMERIC,
                timestamp       NUMERIC
            );
            ",
        )?;
        Ok(())
    }

    pub fn record(&self, row: &StatsRow) -> RecorderResult<()> {
        match row {
            StatsRow::Drops(row) => self.record_drops(row),
            StatsRow::Burst(row) => self.record_burst(row),
            StatsRow::StreamBurst(row) => self.record_stream_burst(row),
            StatsRow::Flow(row) => self.record_flow(row),
        }
    }

    pub fn record_drops(&self, row: &DropsRow) -> RecorderResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO drops (packets_dropped, packets_total, duplicates, media_rate, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.packets_dropped as i64,
                row.packets_total as i64,
                row.duplicates as i64,
                row.media_rate as f64,
                row.timestamp_ns,
            ],
        )?;
        Ok(())
    }

    pub fn record_burst(&self, row: &BurstRow) -> RecorderResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO bursts (port, packets_received, bytes_received, burst_errors, burst_length, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.port as i64,
                row.packets_received as i64,
                row.bytes_received as i64,
                row.burst_errors as i64,
                row.burst_length as i64,
                row.timestamp_ns,
            ],
        )?;
        Ok(())
    }

    pub fn record_stream_burst(&self, row: &StreamBurstRow) -> RecorderResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO sbursts (burst_length, timestamp) VALUES (?1, ?2)",
            params![row.burst_length as i64, row.timestamp_ns],
        )?;
        Ok(())
    }

    pub fn record_flow(&self, row: &FlowRow) -> RecorderResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO flows (port, burst_count, reverses, duplicates, longest_burst, sequence_breaks, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.port as i64,
                row.burst_count as i64,
                row.reverses as i64,
                row.duplicates as i64,
                row.longest_burst as i64,
                row.seq_breaks as i64,
                row.timestamp_ns,
            ],
        )?;
        Ok(())
    }
}

pub struct StatsWriter;

impl StatsWriter {
    /// Moves the recorder onto the blocking pool behind an unbounded
    /// channel. Dropping the returned sender drains the queue and ends the
    /// task; await the handle for a clean flush on shutdown.
    pub fn spawn(recorder: StatsRecorder) -> (mpsc::UnboundedSender<StatsRow>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<StatsRow>();
        let handle = tokio::task::spawn_blocking(move || {
            while let Some(row) = rx.blocking_recv() {
                if let Err(err) = recorder.record(&row) {
                    error!("discarding {} row: {err}", row.table());
                }
            }
        });
        (tx, handle)
    }
}
