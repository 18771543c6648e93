/// Restriction policy command handlers
use anyhow::Result;
use monkgate_storage::{AppId, Database, RestrictionPolicy};
use std::{collections::BTreeSet, time::Duration};
use tabled::{Table, Tabled};

use super::helpers::{format_timestamp, open_bridge, parse_app_ids, permission_label};

/// Restricted-app edits
pub enum AppsActionType {
    Set { apps: Vec<String> },
    Add { apps: Vec<String> },
    Remove { apps: Vec<String> },
    Clear,
}

/// Unlock window edits
pub enum UnlockActionType {
    Grant { minutes: u64 },
    At { expires_at_ms: i64 },
    Clear,
}

#[derive(Tabled)]
struct AppRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Restricted app")]
    app: String,
}

pub fn show_policy() -> Result<()> {
    let bridge = open_bridge()?;
    let policy = bridge.policy()?;

    println!("Restriction Policy");
    println!("{}", "=".repeat(40));
    println!(
        "Protection: {}",
        if policy.enabled { "ENABLED" } else { "DISABLED" }
    );
    match policy.unlock_expires_at {
        Some(expiry) if bridge.unlock_minutes_remaining() > 0 => println!(
            "Unlocked until {} ({} min left)",
            format_timestamp(expiry),
            bridge.unlock_minutes_remaining()
        ),
        Some(expiry) => println!("Unlock expired at {}", format_timestamp(expiry)),
        None => println!("Unlock: none"),
    }
    println!();

    if policy.restricted_apps.is_empty() {
        println!("No restricted apps. Add some with: monkgate apps add <app-id>");
    } else {
        println!("{}", app_table(&policy));
    }
    Ok(())
}

fn app_table(policy: &RestrictionPolicy) -> Table {
    let rows: Vec<AppRow> = policy
        .restricted_apps
        .iter()
        .enumerate()
        .map(|(i, app)| AppRow {
            index: i + 1,
            app: app.to_string(),
        })
        .collect();
    Table::new(rows)
}

/// Compute the new restricted set for an edit
fn apply_apps_action(
    current: &BTreeSet<AppId>,
    action: &AppsActionType,
) -> Result<BTreeSet<AppId>> {
    let next = match action {
        AppsActionType::Set { apps } => parse_app_ids(apps)?.into_iter().collect(),
        AppsActionType::Add { apps } => {
            let mut next = current.clone();
            next.extend(parse_app_ids(apps)?);
            next
        }
        AppsActionType::Remove { apps } => {
            let remove: BTreeSet<AppId> = parse_app_ids(apps)?.into_iter().collect();
            current.difference(&remove).cloned().collect()
        }
        AppsActionType::Clear => BTreeSet::new(),
    };
    Ok(next)
}

pub fn handle_apps_command(action: &AppsActionType) -> Result<()> {
    let bridge = open_bridge()?;
    let current = bridge.policy()?.restricted_apps;
    let next = apply_apps_action(&current, action)?;

    if next == current {
        println!("Restricted apps unchanged ({} apps)", current.len());
        return Ok(());
    }

    let apps: Vec<AppId> = next.into_iter().collect();
    bridge.set_restricted_apps(&apps)?;
    println!("Restricted apps updated ({} apps)", apps.len());
    for app in &apps {
        println!("  - {app}");
    }
    Ok(())
}

pub fn set_enabled(enabled: bool) -> Result<()> {
    let bridge = open_bridge()?;
    bridge.set_enabled(enabled)?;
    if enabled {
        println!("Protection enabled");
    } else {
        println!("Protection disabled");
    }
    Ok(())
}

pub fn handle_unlock_command(action: &UnlockActionType) -> Result<()> {
    let bridge = open_bridge()?;
    match action {
        UnlockActionType::Grant { minutes } => {
            let expires_at = bridge.grant_unlock(Duration::from_secs(minutes * 60))?;
            println!(
                "Unlocked for {minutes} minutes (until {})",
                format_timestamp(expires_at)
            );
        }
        UnlockActionType::At { expires_at_ms } => {
            bridge.set_unlock_expiry(*expires_at_ms)?;
            if *expires_at_ms > 0 {
                println!("Unlock expiry set to {}", format_timestamp(*expires_at_ms));
            } else {
                println!("Unlock cleared");
            }
        }
        UnlockActionType::Clear => {
            bridge.clear_unlock()?;
            println!("Unlock cleared, protection resumes on the next poll");
        }
    }
    Ok(())
}

pub async fn show_permissions() -> Result<()> {
    let bridge = open_bridge()?;
    println!("Permissions");
    println!("{}", "=".repeat(40));
    println!(
        "Foreground detection: {}",
        permission_label(bridge.has_foreground_permission().await)
    );
    println!(
        "Focus redirect:       {}",
        permission_label(bridge.has_redirect_permission().await)
    );
    Ok(())
}

/// Wipe policy and pending signal (account reset)
pub fn reset(confirm: bool) -> Result<()> {
    if !confirm {
        println!("This removes the restricted apps, unlock window and any pending block.");
        println!("Re-run with --yes to confirm.");
        return Ok(());
    }
    Database::new(None)?.reset()?;
    println!("Policy store reset");
    Ok(())
}
