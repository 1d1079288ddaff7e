use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{Result, SessionError};
use crate::store::{cutoff, SessionStore};

/// Durable session store on top of a single SQLite connection.
///
/// Wraps the connection in a `Mutex`; the gateway handles one turn per
/// identity at a time so contention stays low.
pub struct SqliteSessionStore {
    db: Mutex<Connection>,
}

impl SqliteSessionStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| SessionError::Poisoned)
    }
}

impl SessionStore for SqliteSessionStore {
    #[instrument(skip(self))]
    fn get(&self, identity: &str, key: &str) -> Result<Option<Value>> {
        let db = self.lock()?;
        let raw = match db.query_row(
            "SELECT value FROM session_values WHERE identity = ?1 AND key = ?2",
            rusqlite::params![identity, key],
            |row| row.get::<_, String>(0),
        ) {
            Ok(raw) => raw,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(SessionError::Database(e)),
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| SessionError::InvalidValue {
                key: key.to_string(),
                source,
            })
    }

    #[instrument(skip(self, value))]
    fn set(&self, identity: &str, key: &str, value: &Value) -> Result<()> {
        let raw = serde_json::to_string(value).map_err(|source| SessionError::InvalidValue {
            key: key.to_string(),
            source,
        })?;
        let now = timestamp(chrono::Utc::now());
        let db = self.lock()?;
        db.execute(
            "INSERT INTO session_values (identity, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(identity, key) DO UPDATE
             SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![identity, key, raw, now],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn delete(&self, identity: &str, key: &str) -> Result<()> {
        let db = self.lock()?;
        db.execute(
            "DELETE FROM session_values WHERE identity = ?1 AND key = ?2",
            rusqlite::params![identity, key],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn purge_idle(&self, max_idle: Duration) -> Result<usize> {
        let cutoff = timestamp(cutoff(max_idle));
        let db = self.lock()?;

        let idle: Vec<String> = {
            let mut stmt = db.prepare(
                "SELECT identity FROM session_values
                 GROUP BY identity
                 HAVING MAX(updated_at) < ?1",
            )?;
            let rows =
                stmt.query_map(rusqlite::params![cutoff], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        for identity in &idle {
            db.execute(
                "DELETE FROM session_values WHERE identity = ?1",
                rusqlite::params![identity],
            )?;
        }
        debug!(purged = idle.len(), "purged idle sessions");
        Ok(idle.len())
    }
}

/// Fixed-width UTC timestamps so `updated_at` compares lexicographically.
fn timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
