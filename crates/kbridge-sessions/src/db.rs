use rusqlite::Connection;

use crate::error::Result;

/// Initialise the session values table and its index.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS session_values (
            identity    TEXT NOT NULL,
            key         TEXT NOT NULL,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            PRIMARY KEY (identity, key)
        );
        CREATE INDEX IF NOT EXISTS idx_session_values_updated
            ON session_values(updated_at);",
    )?;
    Ok(())
}
