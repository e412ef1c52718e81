//! Result and alert sinks.
//!
//! The worker hands every `FrameResult` and `Alert` to a sink synchronously
//! inside its cycle; sinks must therefore be cheap and must never panic into
//! the worker. Two implementations are provided behind the same traits:
//! SQLite for deployments and an in-memory store for tests and demos,
//! mirroring each other's observable behavior (most-recent-first reads,
//! resolved filtering).

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::alerts::{Alert, Severity};
use crate::{now_ts, FrameResult, StreamConfig, Summary};

/// In-memory retention: trim a stream's results to this many once the cap
/// is exceeded.
const RESULTS_SOFT_CAP: usize = 5000;
const RESULTS_TRIM_TO: usize = 2000;
const ALERTS_SOFT_CAP: usize = 2000;
const ALERTS_TRIM_TO: usize = 1000;

/// Persistence for per-frame model results.
pub trait ResultSink: Send + Sync {
    fn add_result(&self, result: &FrameResult) -> Result<()>;

    /// Recent results for a stream, most recent first.
    fn recent_results(&self, stream_id: &str, limit: usize) -> Result<Vec<FrameResult>>;
}

/// Persistence for threshold alerts.
pub trait AlertSink: Send + Sync {
    fn add_alert(&self, alert: &Alert) -> Result<()>;

    /// Alerts, most recent first. `resolved` filters when given.
    fn alerts(&self, resolved: Option<bool>) -> Result<Vec<Alert>>;

    /// Mark an alert resolved. Returns false when the id is unknown.
    fn resolve_alert(&self, alert_id: i64) -> Result<bool>;
}

/// A stored stream configuration plus its control-plane status.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredStream {
    pub config: StreamConfig,
    pub status: String,
}

/// Persistence for stream configurations, so a deployment can restore its
/// stream set across daemon restarts.
pub trait StreamStore: Send + Sync {
    /// Insert or replace a stream's configuration, marking it active.
    fn save_stream(&self, config: &StreamConfig) -> Result<()>;

    fn set_stream_status(&self, stream_id: &str, status: &str) -> Result<()>;

    fn stream_configs(&self) -> Result<Vec<StoredStream>>;
}

// -------------------- SQLite --------------------

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.ensure_schema()?;
        Ok(storage)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("storage connection lock poisoned"))
    }

    fn ensure_schema(&self) -> Result<()> {
        self.lock()?.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS streams (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              stream_id TEXT NOT NULL UNIQUE,
              source TEXT NOT NULL,
              models TEXT NOT NULL,
              status TEXT NOT NULL DEFAULT 'active',
              created_at REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS stream_results (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              stream_id TEXT NOT NULL,
              model_name TEXT NOT NULL,
              timestamp REAL NOT NULL,
              result_data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS alerts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              stream_id TEXT NOT NULL,
              alert_type TEXT NOT NULL,
              message TEXT NOT NULL,
              severity TEXT NOT NULL DEFAULT 'medium',
              resolved INTEGER NOT NULL DEFAULT 0,
              created_at REAL NOT NULL,
              resolved_at REAL
            );

            CREATE INDEX IF NOT EXISTS idx_results_stream ON stream_results(stream_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_alerts_stream ON alerts(stream_id);
            "#,
        )?;
        Ok(())
    }
}

impl ResultSink for SqliteStorage {
    fn add_result(&self, result: &FrameResult) -> Result<()> {
        let result_data = serde_json::to_string(&result.summary)?;
        self.lock()?.execute(
            r#"
            INSERT INTO stream_results(stream_id, model_name, timestamp, result_data)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                result.stream_id,
                result.model,
                result.timestamp,
                result_data
            ],
        )?;
        Ok(())
    }

    fn recent_results(&self, stream_id: &str, limit: usize) -> Result<Vec<FrameResult>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT stream_id, model_name, timestamp, result_data
            FROM stream_results WHERE stream_id = ?1
            ORDER BY timestamp DESC, id DESC LIMIT ?2
            "#,
        )?;
        let mut rows = stmt.query(params![stream_id, limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let raw: String = row.get(3)?;
            let summary: Summary = serde_json::from_str(&raw)?;
            out.push(FrameResult {
                stream_id: row.get(0)?,
                model: row.get(1)?,
                timestamp: row.get(2)?,
                summary,
            });
        }
        Ok(out)
    }
}

impl AlertSink for SqliteStorage {
    fn add_alert(&self, alert: &Alert) -> Result<()> {
        self.lock()?.execute(
            r#"
            INSERT INTO alerts(stream_id, alert_type, message, severity, resolved, created_at, resolved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                alert.stream_id,
                alert.alert_type,
                alert.message,
                alert.severity.as_str(),
                alert.resolved as i64,
                alert.created_at,
                alert.resolved_at
            ],
        )?;
        Ok(())
    }

    fn alerts(&self, resolved: Option<bool>) -> Result<Vec<Alert>> {
        let conn = self.lock()?;
        let mut stmt;
        let mut rows = match resolved {
            Some(flag) => {
                stmt = conn.prepare(
                    r#"
                    SELECT id, stream_id, alert_type, message, severity, resolved, created_at, resolved_at
                    FROM alerts WHERE resolved = ?1 ORDER BY created_at DESC, id DESC LIMIT 100
                    "#,
                )?;
                stmt.query(params![flag as i64])?
            }
            None => {
                stmt = conn.prepare(
                    r#"
                    SELECT id, stream_id, alert_type, message, severity, resolved, created_at, resolved_at
                    FROM alerts ORDER BY created_at DESC, id DESC LIMIT 100
                    "#,
                )?;
                stmt.query([])?
            }
        };
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let severity_raw: String = row.get(4)?;
            let severity = Severity::parse(&severity_raw)
                .ok_or_else(|| anyhow!("corrupt alert row: unknown severity '{}'", severity_raw))?;
            let resolved_flag: i64 = row.get(5)?;
            out.push(Alert {
                id: Some(row.get(0)?),
                stream_id: row.get(1)?,
                alert_type: row.get(2)?,
                message: row.get(3)?,
                severity,
                resolved: resolved_flag != 0,
                created_at: row.get(6)?,
                resolved_at: row.get(7)?,
            });
        }
        Ok(out)
    }

    fn resolve_alert(&self, alert_id: i64) -> Result<bool> {
        let changed = self.lock()?.execute(
            "UPDATE alerts SET resolved = 1, resolved_at = ?1 WHERE id = ?2 AND resolved = 0",
            params![now_ts()?, alert_id],
        )?;
        Ok(changed > 0)
    }
}

impl StreamStore for SqliteStorage {
    fn save_stream(&self, config: &StreamConfig) -> Result<()> {
        let models = serde_json::to_string(&config.models)?;
        let conn = self.lock()?;
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM streams WHERE stream_id = ?1",
                params![config.stream_id],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE streams SET source = ?1, models = ?2, status = 'active' WHERE id = ?3",
                    params![config.source, models, id],
                )?;
            }
            None => {
                conn.execute(
                    r#"
                    INSERT INTO streams(stream_id, source, models, status, created_at)
                    VALUES (?1, ?2, ?3, 'active', ?4)
                    "#,
                    params![config.stream_id, config.source, models, now_ts()?],
                )?;
            }
        }
        Ok(())
    }

    fn set_stream_status(&self, stream_id: &str, status: &str) -> Result<()> {
        self.lock()?.execute(
            "UPDATE streams SET status = ?1 WHERE stream_id = ?2",
            params![status, stream_id],
        )?;
        Ok(())
    }

    fn stream_configs(&self) -> Result<Vec<StoredStream>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT stream_id, source, models, status FROM streams ORDER BY id ASC")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let models_raw: String = row.get(2)?;
            out.push(StoredStream {
                config: StreamConfig {
                    stream_id: row.get(0)?,
                    source: row.get(1)?,
                    models: serde_json::from_str(&models_raw)?,
                    enabled: true,
                },
                status: row.get(3)?,
            });
        }
        Ok(out)
    }
}

// -------------------- In-memory --------------------

#[derive(Default)]
struct InMemoryInner {
    results: HashMap<String, Vec<FrameResult>>,
    alerts: Vec<Alert>,
    streams: Vec<StoredStream>,
    next_alert_id: i64,
}

/// In-memory sink for tests and demos. Applies a soft retention cap so a
/// long-running demo cannot grow without bound.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<InMemoryInner>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl ResultSink for InMemoryStorage {
    fn add_result(&self, result: &FrameResult) -> Result<()> {
        let mut inner = self.lock()?;
        let entries = inner.results.entry(result.stream_id.clone()).or_default();
        entries.push(result.clone());
        if entries.len() > RESULTS_SOFT_CAP {
            let drop = entries.len() - RESULTS_TRIM_TO;
            entries.drain(..drop);
        }
        Ok(())
    }

    fn recent_results(&self, stream_id: &str, limit: usize) -> Result<Vec<FrameResult>> {
        let inner = self.lock()?;
        let Some(entries) = inner.results.get(stream_id) else {
            return Ok(Vec::new());
        };
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}

impl AlertSink for InMemoryStorage {
    fn add_alert(&self, alert: &Alert) -> Result<()> {
        let mut inner = self.lock()?;
        inner.next_alert_id += 1;
        let mut stored = alert.clone();
        stored.id = Some(inner.next_alert_id);
        inner.alerts.push(stored);
        if inner.alerts.len() > ALERTS_SOFT_CAP {
            let drop = inner.alerts.len() - ALERTS_TRIM_TO;
            inner.alerts.drain(..drop);
        }
        Ok(())
    }

    fn alerts(&self, resolved: Option<bool>) -> Result<Vec<Alert>> {
        let inner = self.lock()?;
        Ok(inner
            .alerts
            .iter()
            .rev()
            .filter(|alert| resolved.map_or(true, |flag| alert.resolved == flag))
            .take(100)
            .cloned()
            .collect())
    }

    fn resolve_alert(&self, alert_id: i64) -> Result<bool> {
        let mut inner = self.lock()?;
        for alert in inner.alerts.iter_mut() {
            if alert.id == Some(alert_id) && !alert.resolved {
                alert.resolved = true;
                alert.resolved_at = Some(now_ts()?);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl StreamStore for InMemoryStorage {
    fn save_stream(&self, config: &StreamConfig) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(entry) = inner
            .streams
            .iter_mut()
            .find(|entry| entry.config.stream_id == config.stream_id)
        {
            entry.config = config.clone();
            entry.status = "active".to_string();
        } else {
            inner.streams.push(StoredStream {
                config: config.clone(),
                status: "active".to_string(),
            });
        }
        Ok(())
    }

    fn set_stream_status(&self, stream_id: &str, status: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(entry) = inner
            .streams
            .iter_mut()
            .find(|entry| entry.config.stream_id == stream_id)
        {
            entry.status = status.to_string();
        }
        Ok(())
    }

    fn stream_configs(&self) -> Result<Vec<StoredStream>> {
        Ok(self.lock()?.streams.clone())
    }
}
