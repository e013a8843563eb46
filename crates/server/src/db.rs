// Event-log persistence using SQLite
//
// Stands in for the document store the readers write into. The engine treats
// it as an opaque collaborator: append scan events, fetch them bounded by a
// snapshot time, fetch the step catalog. Timestamps are stored as integer
// milliseconds; the insertion sequence is the autoincrement rowid, which is
// what the projector's tie-break relies on.

use chrono::{DateTime, Utc};
use mes_analytics::{CatalogSource, EventStore};
use mes_core::{EngineError, ScanEvent, StepCatalog, StepInfo};
use rusqlite::{params, Connection};
use serde::Deserialize;
use std::path::Path;
use std::sync::Mutex;

/// Ingest shape: the store assigns `seq`, and a reader that sends no
/// timestamp gets the ingest time
#[derive(Debug, Clone, Deserialize)]
pub struct NewScanEvent {
    pub item_id: String,
    pub step_rank: u32,
    pub step_name: String,
    #[serde(default)]
    pub reader_id: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn store_err(e: rusqlite::Error) -> EngineError {
    EngineError::SourceUnavailable(e.to_string())
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let conn = Connection::open(path).map_err(store_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS scan_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id TEXT NOT NULL,
                step_rank INTEGER NOT NULL,
                step_name TEXT NOT NULL,
                reader_id TEXT,
                operator TEXT,
                ts_ms INTEGER NOT NULL,
                duration_secs REAL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS process_steps (
                step_rank INTEGER PRIMARY KEY,
                step_name TEXT NOT NULL,
                reader_type TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_scan_events_ts
                ON scan_events(ts_ms);

            CREATE INDEX IF NOT EXISTS idx_scan_events_item
                ON scan_events(item_id);
        "#,
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Append a batch of events in one transaction. Returns how many were
    /// written.
    pub fn append_events(&self, events: &[NewScanEvent]) -> Result<u64, EngineError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(store_err)?;
        let now = Utc::now();
        for event in events {
            let ts = event.timestamp.unwrap_or(now);
            tx.execute(
                "INSERT INTO scan_events
                    (item_id, step_rank, step_name, reader_id, operator, ts_ms, duration_secs, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event.item_id,
                    event.step_rank,
                    event.step_name,
                    event.reader_id,
                    event.operator,
                    ts.timestamp_millis(),
                    event.duration_secs,
                    now.to_rfc3339(),
                ],
            )
            .map_err(store_err)?;
        }
        tx.commit().map_err(store_err)?;
        Ok(events.len() as u64)
    }

    /// Insert the given catalog when the process_steps table is empty.
    /// Returns whether seeding happened.
    pub fn seed_catalog_if_empty(&self, catalog: &StepCatalog) -> Result<bool, EngineError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(store_err)?;
        let existing: u64 = tx
            .query_row("SELECT COUNT(*) FROM process_steps", [], |row| row.get(0))
            .map_err(store_err)?;
        if existing > 0 {
            return Ok(false);
        }
        for step in catalog.steps() {
            tx.execute(
                "INSERT INTO process_steps (step_rank, step_name, reader_type) VALUES (?1, ?2, ?3)",
                params![step.rank, step.name, step.reader_type],
            )
            .map_err(store_err)?;
        }
        tx.commit().map_err(store_err)?;
        Ok(true)
    }

    fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScanEvent> {
        let ts_ms: i64 = row.get("ts_ms")?;
        Ok(ScanEvent {
            seq: row.get::<_, i64>("seq")? as u64,
            item_id: row.get("item_id")?,
            step_rank: row.get("step_rank")?,
            step_name: row.get("step_name")?,
            reader_id: row.get("reader_id")?,
            operator: row.get("operator")?,
            timestamp: DateTime::from_timestamp_millis(ts_ms).unwrap_or(DateTime::UNIX_EPOCH),
            duration_secs: row.get("duration_secs")?,
        })
    }
}

impl EventStore for SqliteStore {
    fn fetch_events(&self, as_of: DateTime<Utc>) -> Result<Vec<ScanEvent>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT seq, item_id, step_rank, step_name, reader_id, operator, ts_ms, duration_secs
                 FROM scan_events WHERE ts_ms <= ?1",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![as_of.timestamp_millis()], Self::row_to_event)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    fn fetch_item_events(
        &self,
        item_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<ScanEvent>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT seq, item_id, step_rank, step_name, reader_id, operator, ts_ms, duration_secs
                 FROM scan_events WHERE item_id = ?1 AND ts_ms <= ?2
                 ORDER BY ts_ms, step_rank, seq",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![item_id, as_of.timestamp_millis()], Self::row_to_event)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }
}

impl CatalogSource for SqliteStore {
    fn fetch_catalog(&self) -> Result<StepCatalog, EngineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT step_rank, step_name, reader_type FROM process_steps ORDER BY step_rank")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StepInfo {
                    rank: row.get("step_rank")?,
                    name: row.get("step_name")?,
                    reader_type: row.get("reader_type")?,
                })
            })
            .map_err(store_err)?;
        let steps = rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)?;
        Ok(StepCatalog::new(steps))
    }
}
