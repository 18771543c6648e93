use anyhow::{Context, Result};
use std::collections::BTreeSet;

use super::{helpers, Database};
use crate::models::{keys, AppId, RestrictionPolicy};

impl Database {
    /// Read the full restriction policy. Missing keys fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_policy(&self) -> Result<RestrictionPolicy> {
        let conn = self.lock()?;
        let defaults = RestrictionPolicy::default();

        let restricted_apps = match helpers::get_value(&conn, keys::RESTRICTED_APPS)? {
            Some(json) => serde_json::from_str::<BTreeSet<AppId>>(&json).unwrap_or_else(|e| {
                log::warn!("Ignoring unreadable {} value: {e}", keys::RESTRICTED_APPS);
                BTreeSet::new()
            }),
            None => defaults.restricted_apps,
        };

        let enabled = helpers::get_value(&conn, keys::ENABLED)?
            .map_or(defaults.enabled, |v| v != "false");

        let unlock_expires_at = match helpers::get_value(&conn, keys::UNLOCK_EXPIRES_AT)? {
            Some(raw) => match raw.parse::<i64>() {
                Ok(ms) if ms > 0 => Some(ms),
                Ok(_) => None,
                Err(e) => {
                    log::warn!("Ignoring unreadable {} value: {e}", keys::UNLOCK_EXPIRES_AT);
                    None
                }
            },
            None => None,
        };

        Ok(RestrictionPolicy {
            restricted_apps,
            enabled,
            unlock_expires_at,
        })
    }

    /// Replace the restricted-app set. Duplicates collapse; the list is stored sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails
    pub fn set_restricted_apps(&self, apps: &[AppId]) -> Result<()> {
        let set: BTreeSet<&AppId> = apps.iter().collect();
        let json = serde_json::to_string(&set)?;
        let conn = self.lock()?;
        helpers::put_value(&conn, keys::RESTRICTED_APPS, &json)
            .context("Failed to write restricted apps")?;
        log::debug!("Restricted apps set ({} entries)", set.len());
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the write fails
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        let conn = self.lock()?;
        helpers::put_value(&conn, keys::ENABLED, if enabled { "true" } else { "false" })
            .context("Failed to write enabled flag")?;
        log::debug!("Blocking enabled = {enabled}");
        Ok(())
    }

    /// Set the unlock expiry (epoch ms). Zero or negative clears the window.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails
    pub fn set_unlock_expiry(&self, expires_at_ms: i64) -> Result<()> {
        if expires_at_ms <= 0 {
            return self.clear_unlock_expiry();
        }
        let conn = self.lock()?;
        helpers::put_value(&conn, keys::UNLOCK_EXPIRES_AT, &expires_at_ms.to_string())
            .context("Failed to write unlock expiry")?;
        log::debug!("Unlock expiry set to {expires_at_ms}");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the delete fails
    pub fn clear_unlock_expiry(&self) -> Result<()> {
        let conn = self.lock()?;
        helpers::delete_value(&conn, keys::UNLOCK_EXPIRES_AT)
            .context("Failed to clear unlock expiry")?;
        log::debug!("Unlock expiry cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apps(ids: &[&str]) -> Vec<AppId> {
        ids.iter().map(|id| AppId::parse(id).unwrap()).collect()
    }

    #[test]
    fn test_empty_store_yields_default_policy() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_policy().unwrap(), RestrictionPolicy::default());
    }

    #[test]
    fn test_set_restricted_apps_replaces_all() {
        let db = Database::open_in_memory().unwrap();
        db.set_restricted_apps(&apps(&["app.social", "app.video"]))
            .unwrap();
        db.set_restricted_apps(&apps(&["app.games"])).unwrap();

        let policy = db.get_policy().unwrap();
        assert_eq!(policy.restricted_apps.len(), 1);
        assert!(policy.is_restricted("app.games"));
        assert!(!policy.is_restricted("app.social"));
    }

    #[test]
    fn test_set_restricted_apps_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let list = apps(&["app.video", "app.social", "app.video"]);
        db.set_restricted_apps(&list).unwrap();
        let first = db.get_policy().unwrap();
        db.set_restricted_apps(&list).unwrap();
        let second = db.get_policy().unwrap();

        assert_eq!(first, second);
        assert_eq!(second.restricted_apps.len(), 2);
        assert!(db.peek_pending_block().unwrap().is_none());
    }

    #[test]
    fn test_enabled_flag_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.set_enabled(false).unwrap();
        assert!(!db.get_policy().unwrap().enabled);
        db.set_enabled(true).unwrap();
        assert!(db.get_policy().unwrap().enabled);
    }

    #[test]
    fn test_unlock_expiry_set_and_clear() {
        let db = Database::open_in_memory().unwrap();
        db.set_unlock_expiry(1_000).unwrap();
        assert_eq!(db.get_policy().unwrap().unlock_expires_at, Some(1_000));

        db.set_unlock_expiry(0).unwrap();
        assert_eq!(db.get_policy().unwrap().unlock_expires_at, None);

        db.set_unlock_expiry(5_000).unwrap();
        db.clear_unlock_expiry().unwrap();
        assert_eq!(db.get_policy().unwrap().unlock_expires_at, None);
    }

    #[test]
    fn test_corrupt_restricted_apps_reads_as_empty() {
        let db = Database::open_in_memory().unwrap();
        {
            let conn = db.lock().unwrap();
            helpers::put_value(&conn, keys::RESTRICTED_APPS, "not json").unwrap();
        }
        let policy = db.get_policy().unwrap();
        assert!(policy.restricted_apps.is_empty());
    }

    #[test]
    fn test_write_failure_is_reported() {
        let db = Database::open_in_memory().unwrap();
        {
            let conn = db.lock().unwrap();
            conn.pragma_update(None, "query_only", true).unwrap();
        }
        assert!(db.set_enabled(false).is_err());
        assert!(db.set_restricted_apps(&apps(&["app.social"])).is_err());
        assert!(db.get_policy().unwrap().enabled);
    }
}
