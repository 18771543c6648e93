use anyhow::{Context, Result};
use rusqlite::params;

use super::{helpers, Database};
use crate::models::{keys, AppId, PendingBlockSignal};

impl Database {
    /// Write a new pending block signal, overwriting any undelivered one
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails
    pub fn write_pending_block(&self, app: &AppId, now_ms: i64) -> Result<PendingBlockSignal> {
        let signal = PendingBlockSignal::new(app.clone(), now_ms);
        let json = serde_json::to_string(&signal)?;
        let conn = self.lock()?;
        helpers::put_value(&conn, keys::PENDING_BLOCK, &json)
            .context("Failed to write pending block signal")?;
        log::debug!("Pending block signal {} set for {app}", signal.id);
        Ok(signal)
    }

    /// Read the pending block signal without clearing it
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn peek_pending_block(&self) -> Result<Option<PendingBlockSignal>> {
        let conn = self.lock()?;
        let Some(json) = helpers::get_value(&conn, keys::PENDING_BLOCK)? else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(signal) => Ok(Some(signal)),
            Err(e) => {
                log::warn!("Ignoring unreadable pending block signal: {e}");
                Ok(None)
            }
        }
    }

    /// Clear the slot only if it still holds `signal`. Returns `false` when the
    /// slot is empty or was overwritten by a newer violation.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails
    pub fn clear_pending_block(&self, signal: &PendingBlockSignal) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM policy_kv
                 WHERE key = ?1 AND json_extract(value, '$.id') = ?2",
                params![keys::PENDING_BLOCK, signal.id.to_string()],
            )
            .context("Failed to clear pending block signal")?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(id: &str) -> AppId {
        AppId::parse(id).unwrap()
    }

    #[test]
    fn test_empty_mailbox() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.peek_pending_block().unwrap().is_none());
    }

    #[test]
    fn test_peek_does_not_clear() {
        let db = Database::open_in_memory().unwrap();
        let written = db.write_pending_block(&app("app.social"), 100).unwrap();

        assert_eq!(db.peek_pending_block().unwrap(), Some(written.clone()));
        assert_eq!(db.peek_pending_block().unwrap(), Some(written));
    }

    #[test]
    fn test_new_violation_overwrites_slot() {
        let db = Database::open_in_memory().unwrap();
        let first = db.write_pending_block(&app("app.social"), 100).unwrap();
        let second = db.write_pending_block(&app("app.video"), 200).unwrap();

        let pending = db.peek_pending_block().unwrap().unwrap();
        assert_eq!(pending, second);

        // Stale delivery must not clear the newer signal
        assert!(!db.clear_pending_block(&first).unwrap());
        assert_eq!(db.peek_pending_block().unwrap(), Some(second.clone()));

        assert!(db.clear_pending_block(&second).unwrap());
        assert!(db.peek_pending_block().unwrap().is_none());
        assert!(!db.clear_pending_block(&second).unwrap());
    }
}
