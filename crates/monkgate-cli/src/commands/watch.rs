//! Foreground UI stand-in: receives `blocked` events from the bridge
//!
//! Every wake of the watcher counts as an activation of the host UI, so a
//! pending signal left by the daemon is picked up within one wake interval.

use anyhow::Result;
use monkgate_core::{BlockedEvent, DeliveryOutcome};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use super::helpers::{format_timestamp, open_bridge};

fn describe(event: &BlockedEvent) -> String {
    format!(
        "[{}] Blocked {}: back to your focus session",
        format_timestamp(event.detected_at.timestamp_millis()),
        event.blocked_app
    )
}

pub async fn watch_command(wake_ms: u64, with_monitor: bool) -> Result<()> {
    let bridge = open_bridge()?;
    let mut events = bridge.subscribe();

    if with_monitor {
        bridge.start_monitoring().await?;
        println!("Monitoring in-process ({})", bridge.monitor_state().await);
    }

    let mut wake = interval(Duration::from_millis(wake_ms.max(1)));
    wake.set_missed_tick_behavior(MissedTickBehavior::Skip);
    println!("Watching for blocked apps (Ctrl-C to stop)...");

    loop {
        tokio::select! {
            _ = wake.tick() => {
                match bridge.on_activation().await {
                    Ok(DeliveryOutcome::Exhausted { blocked_app, attempts }) => {
                        log::warn!("Event for {blocked_app} undelivered after {attempts} attempts");
                    }
                    Ok(_) => {}
                    Err(e) => log::warn!("Activation check failed: {e}"),
                }
            }
            Some(event) = events.recv() => println!("{}", describe(&event)),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    bridge.unsubscribe();
    if let Err(e) = bridge.stop_monitoring().await {
        log::warn!("{e}");
    }
    println!("Stopped watching.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use monkgate_storage::AppId;

    #[test]
    fn test_describe_names_app() {
        let event = BlockedEvent {
            blocked_app: AppId::parse("app.social").unwrap(),
            detected_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        };
        let line = describe(&event);
        assert!(line.contains("Blocked app.social"));
    }
}
