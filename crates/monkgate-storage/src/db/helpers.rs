//! Key-value helpers over the `policy_kv` table.

use rusqlite::{params, Connection, OptionalExtension};

/// Read the raw value stored under `key`
pub fn get_value(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM policy_kv WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

/// Insert or replace the value stored under `key`
pub fn put_value(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO policy_kv (key, value, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
        params![key, value, chrono::Utc::now().timestamp_millis()],
    )?;
    Ok(())
}

/// Remove `key`; returns whether a row was deleted
pub fn delete_value(conn: &Connection, key: &str) -> rusqlite::Result<bool> {
    let deleted = conn.execute("DELETE FROM policy_kv WHERE key = ?1", params![key])?;
    Ok(deleted > 0)
}
