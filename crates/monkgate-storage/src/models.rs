use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, collections::BTreeSet, fmt, str::FromStr, sync::LazyLock};
use thiserror::Error;
use uuid::Uuid;

/// Keys of the flat policy key space shared by the daemon and the UI.
pub mod keys {
    pub const RESTRICTED_APPS: &str = "restricted_apps";
    pub const ENABLED: &str = "enabled";
    pub const UNLOCK_EXPIRES_AT: &str = "unlock_expires_at";
    pub const PENDING_BLOCK: &str = "pending_block";
}

const MAX_APP_ID_LEN: usize = 255;

static APP_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AppIdError {
    #[error("application identifier is empty")]
    Empty,
    #[error("application identifier is longer than {MAX_APP_ID_LEN} characters")]
    TooLong,
    #[error("application identifier contains invalid characters: {0}")]
    InvalidCharacters(String),
}

/// Stable identifier of an installed application, e.g. `com.example.social`
/// (bundle/package id) or an X11 window class.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppId(String);

impl AppId {
    /// Validate and wrap an identifier. Surrounding whitespace is trimmed.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is empty, too long, or contains
    /// characters outside `[A-Za-z0-9_.-]`
    pub fn parse(raw: &str) -> Result<Self, AppIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppIdError::Empty);
        }
        if trimmed.len() > MAX_APP_ID_LEN {
            return Err(AppIdError::TooLong);
        }
        if !APP_ID_PATTERN.is_match(trimmed) {
            return Err(AppIdError::InvalidCharacters(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AppId {
    type Err = AppIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AppId {
    type Error = AppIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AppId> for String {
    fn from(value: AppId) -> Self {
        value.0
    }
}

impl Borrow<str> for AppId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for AppId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Restriction policy as persisted in the policy key space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictionPolicy {
    pub restricted_apps: BTreeSet<AppId>,
    pub enabled: bool,
    /// Epoch milliseconds; enforcement is suspended until this instant
    pub unlock_expires_at: Option<i64>,
}

impl Default for RestrictionPolicy {
    fn default() -> Self {
        Self {
            restricted_apps: BTreeSet::new(),
            enabled: true,
            unlock_expires_at: None,
        }
    }
}

impl RestrictionPolicy {
    /// Whether an unlock window is active at `now_ms`
    #[must_use]
    pub fn is_unlocked_at(&self, now_ms: i64) -> bool {
        self.unlock_expires_at
            .is_some_and(|expires_at| now_ms < expires_at)
    }

    /// Whole minutes left in the unlock window, rounded down
    #[must_use]
    pub fn unlock_minutes_remaining(&self, now_ms: i64) -> u64 {
        match self.unlock_expires_at {
            Some(expires_at) if expires_at > now_ms => {
                u64::try_from((expires_at - now_ms) / 60_000).unwrap_or(0)
            }
            _ => 0,
        }
    }

    #[must_use]
    pub fn is_restricted(&self, app: &str) -> bool {
        self.restricted_apps.contains(app)
    }

    /// Unlock expiry as a UTC timestamp, for display
    #[must_use]
    pub fn unlock_expires_at_utc(&self) -> Option<DateTime<Utc>> {
        self.unlock_expires_at
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

/// Single-slot mailbox entry handing a detected violation from the daemon to
/// the UI. A newer violation overwrites an undelivered one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBlockSignal {
    pub id: Uuid,
    pub blocked_app: AppId,
    /// Epoch milliseconds
    pub set_at: i64,
}

impl PendingBlockSignal {
    #[must_use]
    pub fn new(blocked_app: AppId, set_at: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            blocked_app,
            set_at,
        }
    }
}
