//! Durable Event Log (C2): one instance per project, backing
//! `events.db`, per spec section 4.2.
//!
//! Grounded on the teacher's `persistence.rs` shape (pool + config
//! struct, `initialize_schema`, batched inserts with a `UNIQUE`
//! constraint absorbing duplicates) with the driver swapped from
//! `sqlx`'s `postgres` feature to its `sqlite` feature: spec section 4.2
//! calls for a local, single-file, write-ahead-logged store, not a
//! networked database.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rts_core::{CollectorError, Event, EventKind, Result, Session};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct DurableLogConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for DurableLogConfig {
    fn default() -> Self {
        Self { batch_size: 50, flush_interval: Duration::from_millis(100) }
    }
}

/// Filter accepted by [`DurableLog::get`]. All fields optional; absent
/// fields impose no constraint.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub session_id: Option<String>,
    pub kinds: Vec<EventKind>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

const DEFAULT_LIMIT: u32 = 1000;
const MAX_LIMIT: u32 = 1000;

/// Per-project durable event log. One writer batch at a time (serialized
/// behind an async mutex); concurrent readers are allowed by SQLite's own
/// snapshot isolation in WAL mode.
pub struct DurableLog {
    pool: SqlitePool,
    project: String,
    config: DurableLogConfig,
    batch: Arc<AsyncMutex<Vec<Event>>>,
}

impl DurableLog {
    /// Opens (creating if absent) the SQLite file at `path`, enabling
    /// WAL journaling with relaxed (`NORMAL`) fsync per spec section 4.2
    /// "durability discipline".
    pub async fn open(path: &str, project: impl Into<String>, config: DurableLogConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let log = Self {
            pool,
            project: project.into(),
            config,
            batch: Arc::new(AsyncMutex::new(Vec::new())),
        };
        log.initialize_schema().await?;
        Ok(log)
    }

    /// Opens an in-memory database, used by tests in place of a
    /// networked database (see `SPEC_FULL.md` section 9.5).
    #[cfg(test)]
    pub async fn open_in_memory(project: impl Into<String>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let log = Self {
            pool,
            project: project.into(),
            config: DurableLogConfig::default(),
            batch: Arc::new(AsyncMutex::new(Vec::new())),
        };
        log.initialize_schema().await?;
        Ok(log)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                event_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                project TEXT NOT NULL,
                kind TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                data_blob TEXT NOT NULL,
                UNIQUE(event_id, session_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for index_sql in [
            "CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id)",
            "CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind)",
            "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_events_kind_timestamp ON events(kind, timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_events_project ON events(project)",
        ] {
            sqlx::query(index_sql).execute(&self.pool).await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                project TEXT NOT NULL,
                app_name TEXT NOT NULL,
                connected_at INTEGER NOT NULL,
                disconnected_at INTEGER,
                sdk_version TEXT NOT NULL,
                event_count INTEGER NOT NULL DEFAULT 0,
                is_connected INTEGER NOT NULL,
                build_meta_blob TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_metrics (
                session_id TEXT PRIMARY KEY,
                project TEXT NOT NULL,
                metrics_blob TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Enqueues `event` into the in-memory batch, flushing immediately if
    /// the batch has reached `batch_size`.
    pub async fn add(&self, event: Event) -> Result<()> {
        let mut batch = self.batch.lock().await;
        batch.push(event);
        if batch.len() >= self.config.batch_size {
            let pending = std::mem::take(&mut *batch);
            drop(batch);
            self.flush_batch(pending).await;
        }
        Ok(())
    }

    /// Called by the periodic flush timer task owned by `rts-app`.
    pub async fn flush_tick(&self) {
        let mut batch = self.batch.lock().await;
        if batch.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut *batch);
        drop(batch);
        self.flush_batch(pending).await;
    }

    /// One atomic multi-row insert. A flush error is logged once and the
    /// whole batch dropped (spec section 4.2 "failure semantics") — the
    /// collector never blocks ingestion on persistence failures.
    async fn flush_batch(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        if let Err(e) = self.try_flush_batch(&events).await {
            error!(project = %self.project, error = %e, count = events.len(), "durable log flush failed, batch dropped");
        }
    }

    async fn try_flush_batch(&self, events: &[Event]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for event in events {
            let data_blob = serde_json::to_string(&event.body)?;
            // The UNIQUE(event_id, session_id) constraint absorbs
            // duplicates without aborting the rest of the batch.
            sqlx::query(
                "INSERT OR IGNORE INTO events (event_id, session_id, project, kind, timestamp, data_blob) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&event.event_id)
            .bind(&event.session_id)
            .bind(&self.project)
            .bind(event.kind().as_str())
            .bind(event.timestamp)
            .bind(data_blob)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Final flush, executed on close per spec section 4.2.
    pub async fn close(&self) -> Result<()> {
        self.flush_tick().await;
        Ok(())
    }

    pub async fn get(&self, filter: &EventFilter) -> Result<Vec<StoredEventRow>> {
        let limit = filter.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let offset = filter.offset.unwrap_or(0);

        let mut sql = String::from(
            "SELECT event_id, session_id, kind, timestamp, data_blob FROM events WHERE project = ?",
        );
        if filter.session_id.is_some() {
            sql.push_str(" AND session_id = ?");
        }
        if !filter.kinds.is_empty() {
            let placeholders: Vec<&str> = filter.kinds.iter().map(|_| "?").collect();
            sql.push_str(&format!(" AND kind IN ({})", placeholders.join(",")));
        }
        if filter.since.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if filter.until.is_some() {
            sql.push_str(" AND timestamp <= ?");
        }
        sql.push_str(" ORDER BY timestamp ASC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql).bind(&self.project);
        if let Some(session_id) = &filter.session_id {
            query = query.bind(session_id);
        }
        for kind in &filter.kinds {
            query = query.bind(kind.as_str());
        }
        if let Some(since) = filter.since {
            query = query.bind(since);
        }
        if let Some(until) = filter.until {
            query = query.bind(until);
        }
        query = query.bind(limit as i64).bind(offset as i64);

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                let data_blob: String = row.try_get("data_blob")?;
                let body = serde_json::from_str(&data_blob)?;
                Ok(StoredEventRow {
                    event_id: row.try_get("event_id")?,
                    session_id: row.try_get("session_id")?,
                    timestamp: row.try_get("timestamp")?,
                    body,
                })
            })
            .collect()
    }

    pub async fn count(&self, filter: &EventFilter) -> Result<i64> {
        let mut sql = String::from("SELECT COUNT(*) as total FROM events WHERE project = ?");
        if filter.session_id.is_some() {
            sql.push_str(" AND session_id = ?");
        }
        if !filter.kinds.is_empty() {
            let placeholders: Vec<&str> = filter.kinds.iter().map(|_| "?").collect();
            sql.push_str(&format!(" AND kind IN ({})", placeholders.join(",")));
        }
        if filter.since.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if filter.until.is_some() {
            sql.push_str(" AND timestamp <= ?");
        }

        let mut query = sqlx::query(&sql).bind(&self.project);
        if let Some(session_id) = &filter.session_id {
            query = query.bind(session_id);
        }
        for kind in &filter.kinds {
            query = query.bind(kind.as_str());
        }
        if let Some(since) = filter.since {
            query = query.bind(since);
        }
        if let Some(until) = filter.until {
            query = query.bind(until);
        }

        let row = query.fetch_one(&self.pool).await?;
        Ok(row.try_get("total")?)
    }

    /// Upserts the session row on handshake.
    pub async fn upsert_session(&self, session: &Session) -> Result<()> {
        let build_meta_blob = match &session.build_meta {
            Some(meta) => Some(serde_json::to_string(meta)?),
            None => None,
        };
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, project, app_name, connected_at, disconnected_at, sdk_version, event_count, is_connected, build_meta_blob)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                disconnected_at = excluded.disconnected_at,
                event_count = excluded.event_count,
                is_connected = excluded.is_connected
            "#,
        )
        .bind(&session.session_id)
        .bind(&self.project)
        .bind(&session.app_name)
        .bind(session.connected_at)
        .bind(session.disconnected_at)
        .bind(&session.sdk_version)
        .bind(session.event_count as i64)
        .bind(session.is_connected as i64)
        .bind(build_meta_blob)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_session_metrics(&self, session_id: &str, metrics_json: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_metrics (session_id, project, metrics_blob, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET metrics_blob = excluded.metrics_blob, created_at = excluded.created_at
            "#,
        )
        .bind(session_id)
        .bind(&self.project)
        .bind(metrics_json)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns rows affected, per spec section 4.2 maintenance contract.
    pub async fn delete_before(&self, ts: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM events WHERE project = ? AND timestamp < ?")
            .bind(&self.project)
            .bind(ts)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Triggers storage reclamation. SQLite's equivalent of a vacuum.
    pub async fn compact(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await.map_err(|e| {
            warn!(project = %self.project, error = %e, "compact failed");
            CollectorError::from(e)
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEventRow {
    pub event_id: String,
    pub session_id: String,
    pub timestamp: i64,
    pub body: rts_core::EventBody,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rts_core::{ConsoleEvent, ConsoleLevel, EventBody};

    fn console_event(session_id: &str, id: &str, ts: i64, message: &str) -> Event {
        let mut event = Event::new(
            session_id,
            ts,
            EventBody::Console(ConsoleEvent {
                level: ConsoleLevel::Log,
                message: message.to_string(),
                args: vec![],
                stack_trace: None,
                source_file: None,
            }),
        );
        event.event_id = id.to_string();
        event
    }

    #[tokio::test]
    async fn duplicate_event_ids_are_suppressed() {
        let log = DurableLog::open_in_memory("demo").await.unwrap();
        log.try_flush_batch(&[console_event("S1", "e1", 1, "m1")]).await.unwrap();
        log.try_flush_batch(&[console_event("S1", "e1", 1, "m1")]).await.unwrap();

        let count = log.count(&EventFilter::default()).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn batch_size_one_flushes_each_event() {
        let log = DurableLog::open_in_memory("demo")
            .await
            .unwrap();
        for (id, msg) in [("e1", "m1"), ("e2", "m2"), ("e3", "m3")] {
            log.add(console_event("S1", id, 1, msg)).await.unwrap();
            log.flush_tick().await;
        }
        assert_eq!(log.count(&EventFilter::default()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn get_orders_ascending_by_timestamp() {
        let log = DurableLog::open_in_memory("demo").await.unwrap();
        log.try_flush_batch(&[
            console_event("S1", "e3", 300, "m3"),
            console_event("S1", "e1", 100, "m1"),
            console_event("S1", "e2", 200, "m2"),
        ])
        .await
        .unwrap();

        let rows = log.get(&EventFilter::default()).await.unwrap();
        let timestamps: Vec<i64> = rows.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
    }

    #[tokio::test]
    async fn delete_before_reports_affected_rows() {
        let log = DurableLog::open_in_memory("demo").await.unwrap();
        log.try_flush_batch(&[
            console_event("S1", "e1", 100, "m1"),
            console_event("S1", "e2", 200, "m2"),
        ])
        .await
        .unwrap();

        let deleted = log.delete_before(150).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(log.count(&EventFilter::default()).await.unwrap(), 1);
    }
}
