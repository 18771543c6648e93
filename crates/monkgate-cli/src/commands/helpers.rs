//! Helper utility functions for CLI commands

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use monkgate_core::{create_platform, Bridge, GateConfig, SystemClock};
use monkgate_storage::{AppId, Database};
use std::sync::Arc;

/// Open the UI-side bridge against the shared store
pub fn open_bridge() -> Result<Bridge> {
    let config = GateConfig::load_default()?;
    let store = Arc::new(Database::new(None)?);
    let platform = create_platform()?;
    Ok(Bridge::new(store, platform, config, Arc::new(SystemClock))?)
}

/// Parse raw identifiers, naming the first invalid one
pub fn parse_app_ids(raw: &[String]) -> Result<Vec<AppId>> {
    raw.iter()
        .map(|s| AppId::parse(s).with_context(|| format!("Invalid app id '{s}'")))
        .collect()
}

/// Render epoch milliseconds in local time
pub fn format_timestamp(ms: i64) -> String {
    Local
        .timestamp_millis_opt(ms)
        .single()
        .map_or_else(|| ms.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// `HH:MM:SS` for a number of seconds
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let seconds = seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Label for a permission check result
pub fn permission_label(value: bool) -> &'static str {
    if value {
        "granted"
    } else {
        "missing"
    }
}
