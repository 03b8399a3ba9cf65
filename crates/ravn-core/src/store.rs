//! SQLite persistence for events and scores.
//!
//! One connection per store handle; the pipeline keeps a single writer on
//! the analysis side. Writes are transactional at the statement level
//! (SQLite autocommit).

use std::path::Path;

use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use tracing::debug;

use crate::error::{Error, Result};
use crate::event::{AnalysisResult, Event, EventKind, Severity, ThreatLevel};

/// Filter for [`EventStore::read_events`]. `None` fields match everything,
/// mirroring the 0 / −1 sentinel semantics of the wire-level filter.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kind: Option<EventKind>,
    pub ts_min_ns: Option<u64>,
    pub ts_max_ns: Option<u64>,
    pub pid: Option<u32>,
    pub processed: Option<bool>,
}

/// Partial update for [`EventStore::update_event`]. `None` leaves the field
/// unchanged. Only `processed` and `severity` are mutable after insert.
#[derive(Debug, Clone, Default)]
pub struct EventUpdate {
    pub processed: Option<bool>,
    pub severity: Option<Severity>,
}

/// One persisted score row.
#[derive(Debug, Clone)]
pub struct ScoreRow {
    pub event_id: i64,
    pub ts_sec: i64,
    pub threat: f64,
    pub anomaly: f64,
    pub is_threat: bool,
    pub threat_level: ThreatLevel,
    pub recommendations: Vec<String>,
    pub confidence: f64,
}

/// Event id used for baseline z-score rows: row ids start at 1, so id 0
/// never references an event.
pub const BASELINE_EVENT_ID: i64 = 0;

/// Durable, queryable storage for events and analysis scores.
pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    /// Open or create the store at the given path, creating parent
    /// directories and the schema as needed.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Storage(format!("creating {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.init_schema()?;
        debug!(path = %db_path.display(), "event store opened");
        Ok(store)
    }

    /// Open an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an existing store read-only without touching the schema.
    pub fn open_readonly(db_path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { conn })
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts_ns INTEGER NOT NULL,
                kind INTEGER NOT NULL,
                severity INTEGER NOT NULL,
                pid INTEGER NOT NULL,
                uid INTEGER NOT NULL,
                gid INTEGER NOT NULL,
                comm TEXT NOT NULL,
                filename TEXT,
                raw BLOB,
                processed INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS scores (
                event_id INTEGER NOT NULL,
                ts_sec INTEGER NOT NULL,
                threat REAL NOT NULL,
                anomaly REAL NOT NULL,
                is_threat INTEGER NOT NULL,
                threat_level INTEGER NOT NULL,
                recommendations TEXT,
                confidence REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts_ns);
            CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);
            CREATE INDEX IF NOT EXISTS idx_events_pid ON events(pid);
            CREATE INDEX IF NOT EXISTS idx_events_processed ON events(processed);
            CREATE INDEX IF NOT EXISTS idx_scores_is_threat ON scores(is_threat);
            CREATE INDEX IF NOT EXISTS idx_scores_threat ON scores(threat);",
        )?;
        Ok(())
    }

    /// Insert an event and return its new id.
    pub fn create_event(&self, event: &Event) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO events (ts_ns, kind, severity, pid, uid, gid, comm, filename, raw, processed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event.timestamp_ns as i64,
                event.kind.code(),
                event.severity.code(),
                event.pid,
                event.uid,
                event.gid,
                event.comm,
                event.filename,
                event.raw,
                event.processed,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Read events matching the filter, newest first (`ts_ns DESC, id DESC`),
    /// capped at `max` rows.
    pub fn read_events(&self, filter: &EventFilter, max: usize) -> Result<Vec<Event>> {
        if max == 0 {
            return Err(Error::InvalidArgument("max must be > 0".into()));
        }
        let mut sql = String::from(
            "SELECT id, ts_ns, kind, severity, pid, uid, gid, comm, filename, raw, processed
             FROM events WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(kind) = filter.kind {
            sql.push_str(" AND kind = ?");
            args.push(Box::new(kind.code()));
        }
        if let Some(ts_min) = filter.ts_min_ns {
            sql.push_str(" AND ts_ns >= ?");
            args.push(Box::new(ts_min as i64));
        }
        if let Some(ts_max) = filter.ts_max_ns {
            sql.push_str(" AND ts_ns <= ?");
            args.push(Box::new(ts_max as i64));
        }
        if let Some(pid) = filter.pid {
            sql.push_str(" AND pid = ?");
            args.push(Box::new(pid));
        }
        if let Some(processed) = filter.processed {
            sql.push_str(" AND processed = ?");
            args.push(Box::new(processed));
        }
        sql.push_str(" ORDER BY ts_ns DESC, id DESC LIMIT ?");
        args.push(Box::new(max as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter().map(|a| a.as_ref())), |row| {
            Ok(Event {
                id: row.get(0)?,
                timestamp_ns: row.get::<_, i64>(1)? as u64,
                kind: EventKind::from_code(row.get(2)?),
                severity: Severity::from_code(row.get(3)?),
                pid: row.get(4)?,
                uid: row.get(5)?,
                gid: row.get(6)?,
                comm: row.get(7)?,
                filename: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                raw: row.get::<_, Option<Vec<u8>>>(9)?.unwrap_or_default(),
                processed: row.get(10)?,
                processed_time_ns: 0,
            })
        })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Apply a partial update. Fails with [`Error::NotFound`] if no row has
    /// the given id and [`Error::InvalidArgument`] if no field is set.
    pub fn update_event(&self, id: i64, updates: &EventUpdate) -> Result<()> {
        let mut sets: Vec<&str> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(processed) = updates.processed {
            sets.push("processed = ?");
            args.push(Box::new(processed));
        }
        if let Some(severity) = updates.severity {
            sets.push("severity = ?");
            args.push(Box::new(severity.code()));
        }
        if sets.is_empty() {
            return Err(Error::InvalidArgument("no fields to update".into()));
        }

        let sql = format!("UPDATE events SET {} WHERE id = ?", sets.join(", "));
        args.push(Box::new(id));
        let changed = self
            .conn
            .execute(&sql, params_from_iter(args.iter().map(|a| a.as_ref())))?;
        if changed == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Hard-delete an event. Associated score rows remain as orphaned
    /// historical records.
    pub fn delete_event(&self, id: i64) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM events WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Persist an analysis result against its event.
    pub fn create_score(&self, result: &AnalysisResult) -> Result<()> {
        self.conn.execute(
            "INSERT INTO scores (event_id, ts_sec, threat, anomaly, is_threat, threat_level, recommendations, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                result.event_id,
                (result.timestamp_ns / 1_000_000_000) as i64,
                result.threat_score,
                result.anomaly_score,
                result.is_threat,
                result.threat_level.code(),
                result.recommendations.join("\n"),
                result.confidence,
            ],
        )?;
        Ok(())
    }

    /// Append a baseline z-score sample to the score stream.
    pub fn create_baseline_score(&self, ts_sec: i64, z_score: f64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO scores (event_id, ts_sec, threat, anomaly, is_threat, threat_level, recommendations, confidence)
             VALUES (?1, ?2, 0.0, ?3, 0, 0, '', 0.0)",
            params![BASELINE_EVENT_ID, ts_sec, z_score],
        )?;
        Ok(())
    }

    /// Read score rows for one event id (use [`BASELINE_EVENT_ID`] for the
    /// baseline stream), newest first.
    pub fn read_scores(&self, event_id: i64, max: usize) -> Result<Vec<ScoreRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, ts_sec, threat, anomaly, is_threat, threat_level, recommendations, confidence
             FROM scores WHERE event_id = ?1 ORDER BY ts_sec DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![event_id, max as i64], |row| {
            let recommendations: Option<String> = row.get(6)?;
            Ok(ScoreRow {
                event_id: row.get(0)?,
                ts_sec: row.get(1)?,
                threat: row.get(2)?,
                anomaly: row.get(3)?,
                is_threat: row.get(4)?,
                threat_level: ThreatLevel::from_code(row.get(5)?),
                recommendations: recommendations
                    .filter(|r| !r.is_empty())
                    .map(|r| r.lines().map(str::to_string).collect())
                    .unwrap_or_default(),
                confidence: row.get(7)?,
            })
        })?;

        let mut scores = Vec::new();
        for row in rows {
            scores.push(row?);
        }
        Ok(scores)
    }

    /// Number of persisted events, for status and tests.
    pub fn count_events(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_event(ts_ns: u64, kind: EventKind, pid: u32) -> Event {
        Event {
            id: 0,
            timestamp_ns: ts_ns,
            kind,
            severity: Severity::Low,
            pid,
            uid: 1000,
            gid: 1000,
            comm: "proc".to_string(),
            filename: "/usr/bin/proc".to_string(),
            raw: vec![0, 1, 2, 3],
            processed: false,
            processed_time_ns: 0,
        }
    }

    fn make_result(event_id: i64, threat: f64) -> AnalysisResult {
        AnalysisResult {
            event_id,
            timestamp_ns: 5_000_000_000,
            anomaly_score: 1.5,
            threat_score: threat,
            is_anomaly: false,
            is_threat: threat >= 70.0,
            threat_level: ThreatLevel::from_score(threat),
            recommendations: vec!["Continue monitoring".to_string()],
            confidence: 60.0,
        }
    }

    #[test]
    fn test_create_and_read_roundtrip() {
        let store = EventStore::open_in_memory().unwrap();
        let id = store.create_event(&make_event(100, EventKind::ExecFs, 42)).unwrap();
        assert!(id > 0);

        let events = store.read_events(&EventFilter::default(), 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, id);
        assert_eq!(events[0].pid, 42);
        assert_eq!(events[0].kind, EventKind::ExecFs);
        assert_eq!(events[0].raw, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let store = EventStore::open_in_memory().unwrap();
        let mut last = 0;
        for i in 0..20 {
            let id = store
                .create_event(&make_event(1000 - i, EventKind::Network, i as u32))
                .unwrap();
            assert!(id > last, "ids must be assigned monotonically at insert");
            last = id;
        }
    }

    #[test]
    fn test_read_ordering_ts_desc_then_id_desc() {
        let store = EventStore::open_in_memory().unwrap();
        let a = store.create_event(&make_event(100, EventKind::ExecFs, 1)).unwrap();
        let b = store.create_event(&make_event(300, EventKind::ExecFs, 2)).unwrap();
        let c = store.create_event(&make_event(300, EventKind::ExecFs, 3)).unwrap();
        let events = store.read_events(&EventFilter::default(), 10).unwrap();
        let ids: Vec<i64> = events.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![c, b, a]);
    }

    #[test]
    fn test_filters() {
        let store = EventStore::open_in_memory().unwrap();
        store.create_event(&make_event(100, EventKind::ExecFs, 1)).unwrap();
        store.create_event(&make_event(200, EventKind::Network, 2)).unwrap();
        let id = store.create_event(&make_event(300, EventKind::Network, 2)).unwrap();
        store
            .update_event(id, &EventUpdate { processed: Some(true), severity: None })
            .unwrap();

        let by_kind = store
            .read_events(
                &EventFilter { kind: Some(EventKind::Network), ..Default::default() },
                10,
            )
            .unwrap();
        assert_eq!(by_kind.len(), 2);

        let by_pid = store
            .read_events(&EventFilter { pid: Some(1), ..Default::default() }, 10)
            .unwrap();
        assert_eq!(by_pid.len(), 1);

        let by_ts = store
            .read_events(
                &EventFilter {
                    ts_min_ns: Some(150),
                    ts_max_ns: Some(250),
                    ..Default::default()
                },
                10,
            )
            .unwrap();
        assert_eq!(by_ts.len(), 1);
        assert_eq!(by_ts[0].timestamp_ns, 200);

        let processed = store
            .read_events(&EventFilter { processed: Some(true), ..Default::default() }, 10)
            .unwrap();
        assert_eq!(processed.len(), 1);
        assert_eq!(processed[0].id, id);

        let unprocessed = store
            .read_events(&EventFilter { processed: Some(false), ..Default::default() }, 10)
            .unwrap();
        assert_eq!(unprocessed.len(), 2);
    }

    #[test]
    fn test_read_respects_max() {
        let store = EventStore::open_in_memory().unwrap();
        for i in 0..10 {
            store.create_event(&make_event(i, EventKind::ExecFs, i as u32)).unwrap();
        }
        let events = store.read_events(&EventFilter::default(), 3).unwrap();
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_update_is_idempotent_for_processed() {
        let store = EventStore::open_in_memory().unwrap();
        let id = store.create_event(&make_event(100, EventKind::ExecFs, 1)).unwrap();

        let update = EventUpdate { processed: Some(true), severity: None };
        store.update_event(id, &update).unwrap();
        let first = store.read_events(&EventFilter::default(), 1).unwrap();

        // Second application succeeds and leaves the row identical.
        store.update_event(id, &update).unwrap();
        let second = store.read_events(&EventFilter::default(), 1).unwrap();
        assert!(second[0].processed);
        assert_eq!(first[0].processed, second[0].processed);
        assert_eq!(first[0].severity, second[0].severity);
        assert_eq!(first[0].timestamp_ns, second[0].timestamp_ns);
    }

    #[test]
    fn test_update_severity_only() {
        let store = EventStore::open_in_memory().unwrap();
        let id = store.create_event(&make_event(100, EventKind::Security, 1)).unwrap();
        store
            .update_event(
                id,
                &EventUpdate { processed: None, severity: Some(Severity::Critical) },
            )
            .unwrap();
        let events = store.read_events(&EventFilter::default(), 1).unwrap();
        assert_eq!(events[0].severity, Severity::Critical);
        assert!(!events[0].processed);
    }

    #[test]
    fn test_update_missing_row_is_not_found() {
        let store = EventStore::open_in_memory().unwrap();
        let err = store
            .update_event(9999, &EventUpdate { processed: Some(true), severity: None })
            .unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[test]
    fn test_update_with_no_fields_is_invalid() {
        let store = EventStore::open_in_memory().unwrap();
        let id = store.create_event(&make_event(100, EventKind::ExecFs, 1)).unwrap();
        let err = store.update_event(id, &EventUpdate::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_delete_leaves_scores_orphaned() {
        let store = EventStore::open_in_memory().unwrap();
        let id = store.create_event(&make_event(100, EventKind::Security, 7)).unwrap();
        store.create_score(&make_result(id, 80.0)).unwrap();

        store.delete_event(id).unwrap();

        let events = store
            .read_events(&EventFilter { pid: Some(7), ..Default::default() }, 10)
            .unwrap();
        assert!(events.is_empty());

        // The score row survives as an orphaned historical record.
        let scores = store.read_scores(id, 10).unwrap();
        assert_eq!(scores.len(), 1);
        assert!((scores[0].threat - 80.0).abs() < f64::EPSILON);
        assert_eq!(scores[0].threat_level, ThreatLevel::High);
    }

    #[test]
    fn test_delete_missing_row_is_not_found() {
        let store = EventStore::open_in_memory().unwrap();
        assert!(matches!(store.delete_event(42), Err(Error::NotFound)));
    }

    #[test]
    fn test_score_roundtrip_with_recommendations() {
        let store = EventStore::open_in_memory().unwrap();
        let id = store.create_event(&make_event(100, EventKind::Vulnerability, 1)).unwrap();
        let mut result = make_result(id, 92.0);
        result.recommendations = vec![
            "IMMEDIATE: Block process and investigate".to_string(),
            "Apply security patches immediately".to_string(),
        ];
        store.create_score(&result).unwrap();

        let scores = store.read_scores(id, 10).unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].recommendations.len(), 2);
        assert_eq!(scores[0].threat_level, ThreatLevel::Critical);
        assert!(scores[0].is_threat);
    }

    #[test]
    fn test_baseline_stream() {
        let store = EventStore::open_in_memory().unwrap();
        store.create_baseline_score(1000, 0.5).unwrap();
        store.create_baseline_score(1001, 4.2).unwrap();

        let samples = store.read_scores(BASELINE_EVENT_ID, 10).unwrap();
        assert_eq!(samples.len(), 2);
        assert!((samples[0].anomaly - 4.2).abs() < f64::EPSILON);
        assert!(samples[0].recommendations.is_empty());
    }

    #[test]
    fn test_on_disk_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ravn.db");
        let id;
        {
            let store = EventStore::open(&path).unwrap();
            id = store.create_event(&make_event(100, EventKind::Update, 9)).unwrap();
        }
        let store = EventStore::open(&path).unwrap();
        let events = store.read_events(&EventFilter::default(), 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, id);
        assert_eq!(store.count_events().unwrap(), 1);
    }

    #[test]
    fn test_schema_error_on_missing_tables() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.db");
        // Create an empty database file without the schema.
        rusqlite::Connection::open(&path).unwrap();
        let store = EventStore::open_readonly(&path).unwrap();
        let err = store.read_events(&EventFilter::default(), 1).unwrap_err();
        assert!(matches!(err, Error::Schema));
    }
}
