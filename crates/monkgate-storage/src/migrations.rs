use anyhow::{Context, Result};
use rusqlite::Connection;
use std::time::Duration;

/// Busy timeout for cross-process writers (daemon and UI share one file)
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Configure connection pragmas for durable, cross-process access
///
/// # Errors
///
/// Returns an error if a pragma cannot be applied
pub fn configure_connection(conn: &Connection, on_disk: bool) -> Result<()> {
    if on_disk {
        // WAL lets the daemon read while the UI writes
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .context("Failed to enable WAL journal")?;
        log::debug!("Journal mode: {mode}");
    }
    conn.pragma_update(None, "synchronous", "FULL")
        .context("Failed to set synchronous=FULL")?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("Failed to set busy timeout")?;
    Ok(())
}

/// Initialize database schema
///
/// # Errors
///
/// Returns an error if table creation fails
pub fn init_schema(conn: &Connection) -> Result<()> {
    // Flat key space: restricted_apps, enabled, unlock_expires_at, pending_block
    conn.execute(
        "CREATE TABLE IF NOT EXISTS policy_kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn, false).unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'policy_kv'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
