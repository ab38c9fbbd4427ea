//! SQLite database store implementation.

use rusqlite::{params, Connection, Result as SqlResult, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("database lock poisoned")]
    Poisoned,
    #[error("Not found")]
    NotFound,
}

const MIGRATIONS: &[(&str, &str)] = &[
    ("000001_init", include_str!("../../migrations/000001_init.up.sql")),
    ("000002_incidents", include_str!("../../migrations/000002_incidents.up.sql")),
];

/// Thread-safe database store for samples and incidents.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Create a store backed by a private in-memory database.
    pub fn in_memory() -> Result<Self, DbError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DbError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        for (name, sql) in MIGRATIONS {
            conn.execute_batch(sql)
                .map_err(|e| DbError::Migration(format!("{} failed: {}", name, e)))?;
        }

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Samples ---

    /// Append a batch of samples and return how many were written.
    ///
    /// A row that fails to insert is logged and skipped; the rest of the
    /// batch still commits.
    pub fn append_samples(&self, samples: &[ServiceSample]) -> Result<usize, DbError> {
        if samples.is_empty() {
            return Ok(0);
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut written = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO samples (url, status, response_time, timestamp) VALUES (?1, ?2, ?3, ?4)",
            )?;

            for s in samples {
                match stmt.execute(params![s.url, s.status.as_str(), s.response_time, s.timestamp]) {
                    Ok(_) => written += 1,
                    Err(e) => tracing::error!("Failed to append sample for {}: {}", s.url, e),
                }
            }
        }

        tx.commit()?;
        Ok(written)
    }

    /// Samples at or after `since`, oldest first. `None` selects every URL.
    pub fn query_range(&self, url: Option<&str>, since: i64) -> Result<Vec<ServiceSample>, DbError> {
        let conn = self.conn()?;

        let samples = match url {
            Some(url) => {
                let mut stmt = conn.prepare(
                    "SELECT url, status, response_time, timestamp FROM samples
                     WHERE url = ?1 AND timestamp >= ?2 ORDER BY timestamp ASC, id ASC",
                )?;
                let rows = stmt.query_map(params![url, since], row_to_sample)?;
                rows.collect::<SqlResult<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT url, status, response_time, timestamp FROM samples
                     WHERE timestamp >= ?1 ORDER BY timestamp ASC, id ASC",
                )?;
                let rows = stmt.query_map(params![since], row_to_sample)?;
                rows.collect::<SqlResult<Vec<_>>>()?
            }
        };

        Ok(samples)
    }

    /// The `limit` most recent samples for a URL, newest first.
    pub fn recent_samples(&self, url: &str, limit: usize) -> Result<Vec<ServiceSample>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT url, status, response_time, timestamp FROM samples
             WHERE url = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;

        let samples = stmt
            .query_map(params![url, limit as i64], row_to_sample)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(samples)
    }

    /// The newest sample of every URL seen at or after `since`, ordered by URL.
    pub fn latest_samples(&self, since: i64) -> Result<Vec<ServiceSample>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT url, status, response_time, timestamp FROM (
                 SELECT url, status, response_time, timestamp,
                        ROW_NUMBER() OVER (PARTITION BY url ORDER BY timestamp DESC, id DESC) AS rn
                 FROM samples WHERE timestamp >= ?1
             ) WHERE rn = 1 ORDER BY url ASC",
        )?;

        let samples = stmt
            .query_map(params![since], row_to_sample)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(samples)
    }

    /// Delete every sample older than `cutoff` and return how many went.
    pub fn prune_older_than(&self, cutoff: i64) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM samples WHERE timestamp < ?1", params![cutoff])?;
        Ok(removed)
    }

    /// Total number of stored samples.
    pub fn sample_count(&self) -> Result<i64, DbError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM samples", [], |r| r.get(0))?)
    }

    // --- Incidents ---

    /// Insert an incident and return its ID.
    pub fn add_incident(&self, incident: &mut Incident) -> Result<i64, DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO incidents (title, description, kind, started_at, resolved_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                incident.title,
                incident.description,
                incident.kind.as_str(),
                incident.started_at,
                incident.resolved_at,
            ],
        )?;
        let id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO incident_services (incident_id, url) VALUES (?1, ?2)")?;
            for url in &incident.services {
                stmt.execute(params![id, url])?;
            }
        }

        tx.commit()?;
        incident.id = id;
        Ok(id)
    }

    /// Mark an incident resolved at the given time.
    pub fn resolve_incident(&self, id: i64, resolved_at: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE incidents SET resolved_at = ?1 WHERE id = ?2",
            params![resolved_at, id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Get an incident by ID.
    pub fn get_incident(&self, id: i64) -> Result<Incident, DbError> {
        let incidents = self.load_incidents(Some(id), false)?;
        incidents.into_iter().next().ok_or(DbError::NotFound)
    }

    /// All incidents, newest first.
    pub fn get_incidents(&self) -> Result<Vec<Incident>, DbError> {
        self.load_incidents(None, false)
    }

    /// Incidents without a resolution time, newest first.
    pub fn ongoing_incidents(&self) -> Result<Vec<Incident>, DbError> {
        self.load_incidents(None, true)
    }

    fn load_incidents(&self, id: Option<i64>, ongoing_only: bool) -> Result<Vec<Incident>, DbError> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, title, description, kind, started_at, resolved_at FROM incidents
             WHERE (?1 IS NULL OR id = ?1) AND (?2 = 0 OR resolved_at IS NULL)
             ORDER BY started_at DESC, id DESC",
        )?;

        let mut incidents = stmt
            .query_map(params![id, ongoing_only as i64], |row| {
                let kind: String = row.get(3)?;
                Ok(Incident {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    kind: kind.parse().map_err(|e: String| conversion_error(3, e))?,
                    services: Vec::new(),
                    started_at: row.get(4)?,
                    resolved_at: row.get(5)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        if incidents.is_empty() {
            return Ok(incidents);
        }

        let mut services: HashMap<i64, Vec<String>> = HashMap::new();
        let mut stmt = conn.prepare("SELECT incident_id, url FROM incident_services ORDER BY rowid ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (incident_id, url) = row?;
            services.entry(incident_id).or_default().push(url);
        }

        for incident in &mut incidents {
            incident.services = services.remove(&incident.id).unwrap_or_default();
        }

        Ok(incidents)
    }
}

fn row_to_sample(row: &Row<'_>) -> SqlResult<ServiceSample> {
    let status: String = row.get(1)?;
    Ok(ServiceSample {
        url: row.get(0)?,
        status: status.parse().map_err(|e: String| conversion_error(1, e))?,
        response_time: row.get(2)?,
        timestamp: row.get(3)?,
    })
}

fn conversion_error(column: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, msg.into())
}
