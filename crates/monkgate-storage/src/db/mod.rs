//! Durable policy store shared by the monitor daemon and the UI process.
//!
//! Both processes open the same SQLite file. Every write is committed with
//! `synchronous=FULL` before the call returns, so the other process sees it on
//! its next read.

mod helpers;
mod pending;
mod policy;

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use std::{
    path::PathBuf,
    sync::{Mutex, MutexGuard},
};

use crate::migrations;

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "MONKGATE_DATA_DIR";

/// Database connection wrapper
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the policy database
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation, connection opening, or schema initialization fails
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = db_path.unwrap_or_else(Self::default_db_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path).context("Failed to open database connection")?;
        migrations::configure_connection(&conn, true)?;
        migrations::init_schema(&conn)?;

        log::info!("Policy store initialized at: {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database (tests and embedded hosts)
    ///
    /// # Errors
    ///
    /// Returns an error if schema initialization fails
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        migrations::configure_connection(&conn, false)?;
        migrations::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Data directory: `$MONKGATE_DATA_DIR`, else `<local data dir>/monkgate`
    #[must_use]
    pub fn data_dir() -> PathBuf {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
            return PathBuf::from(dir);
        }
        let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("monkgate");
        path
    }

    /// Get default database path
    #[must_use]
    pub fn default_db_path() -> PathBuf {
        Self::data_dir().join("monkgate.db")
    }

    /// Remove every key, including a pending block signal (account reset)
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails
    pub fn reset(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM policy_kv", [])
            .context("Failed to reset policy store")?;
        log::info!("Policy store reset");
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("policy store connection lock poisoned"))
    }
}
