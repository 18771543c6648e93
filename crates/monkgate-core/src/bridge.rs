//! UI-side bridge to the enforcement subsystem.
//!
//! The bridge lives in the UI process. It exposes the policy mutators and
//! permission checks, hosts an in-process monitor when asked to, and hands
//! pending `blocked` signals to the single attached subscriber. The UI must
//! call [`Bridge::on_activation`] every time it comes to the foreground, since
//! a redirect may have recreated it.

use chrono::{DateTime, TimeZone, Utc};
use monkgate_storage::{AppId, Database, PendingBlockSignal, RestrictionPolicy};
use serde::{Deserialize, Serialize};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Mutex as AsyncMutex,
};

use crate::{
    clock::Clock,
    config::GateConfig,
    daemon::{DaemonState, MonitorDaemon, MonitorHandle},
    detector::{ForegroundDetector, HostFilter},
    error::GateError,
    platform::Platform,
};

const SUBSCRIBER_BUFFER: usize = 8;

/// Event delivered to the UI when a restricted app was blocked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedEvent {
    pub blocked_app: AppId,
    pub detected_at: DateTime<Utc>,
}

impl From<&PendingBlockSignal> for BlockedEvent {
    fn from(signal: &PendingBlockSignal) -> Self {
        Self {
            blocked_app: signal.blocked_app.clone(),
            detected_at: Utc
                .timestamp_millis_opt(signal.set_at)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }
}

/// Result of one activation check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    NothingPending,
    Delivered { blocked_app: AppId, attempts: u32 },
    /// No subscriber within the retry budget; the signal was kept
    Exhausted { blocked_app: AppId, attempts: u32 },
}

pub struct Bridge {
    store: Arc<Database>,
    platform: Platform,
    config: GateConfig,
    clock: Arc<dyn Clock>,
    detector: ForegroundDetector,
    subscriber: Mutex<Option<mpsc::Sender<BlockedEvent>>>,
    delivery: AsyncMutex<()>,
    monitor: AsyncMutex<Option<MonitorHandle>>,
}

impl Bridge {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    pub fn new(
        store: Arc<Database>,
        platform: Platform,
        config: GateConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GateError> {
        config.validate()?;
        let detector = ForegroundDetector::new(
            platform.usage.clone(),
            HostFilter::new(config.host_app()?),
            clock.clone(),
            config.lookback(),
        );
        Ok(Self {
            store,
            platform,
            config,
            clock,
            detector,
            subscriber: Mutex::new(None),
            delivery: AsyncMutex::new(()),
            monitor: AsyncMutex::new(None),
        })
    }

    // ==================== Event stream ====================

    /// Attach the single active subscriber, replacing any previous one
    pub fn subscribe(&self) -> mpsc::Receiver<BlockedEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        if let Ok(mut slot) = self.subscriber.lock() {
            if slot.replace(tx).is_some() {
                log::debug!("Replaced previous blocked-event subscriber");
            }
        }
        rx
    }

    pub fn unsubscribe(&self) {
        if let Ok(mut slot) = self.subscriber.lock() {
            slot.take();
        }
    }

    /// Deliver a pending block signal, if any, to the subscriber.
    ///
    /// Retries with capped exponential backoff while no subscriber is
    /// attached. The signal is cleared only after delivery; on exhaustion it
    /// stays in the store for the next activation.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the mailbox cannot be read
    pub async fn on_activation(&self) -> Result<DeliveryOutcome, GateError> {
        // One activation at a time, so a signal is never delivered twice
        let _guard = self.delivery.lock().await;

        let Some(signal) = self
            .store
            .peek_pending_block()
            .map_err(|e| GateError::storage(&e))?
        else {
            return Ok(DeliveryOutcome::NothingPending);
        };

        let event = BlockedEvent::from(&signal);
        let policy = &self.config.delivery;
        let mut attempts = 0;

        loop {
            attempts += 1;
            if self.try_deliver(&event) {
                match self.store.clear_pending_block(&signal) {
                    Ok(true) => {}
                    Ok(false) => log::debug!("Newer block signal arrived during delivery"),
                    Err(e) => log::warn!("Delivered block signal could not be cleared: {e:#}"),
                }
                log::info!("Delivered blocked event for {}", event.blocked_app);
                return Ok(DeliveryOutcome::Delivered {
                    blocked_app: event.blocked_app,
                    attempts,
                });
            }

            if attempts > policy.max_retries {
                break;
            }
            tokio::time::sleep(policy.backoff_delay(attempts - 1)).await;
        }

        let exhausted = GateError::DeliveryExhausted {
            blocked_app: event.blocked_app.clone(),
            attempts,
        };
        log::warn!("{exhausted}; keeping signal for next activation");
        Ok(DeliveryOutcome::Exhausted {
            blocked_app: event.blocked_app,
            attempts,
        })
    }

    fn try_deliver(&self, event: &BlockedEvent) -> bool {
        let Ok(mut slot) = self.subscriber.lock() else {
            return false;
        };
        let Some(tx) = slot.as_ref() else {
            return false;
        };
        match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("Subscriber queue full, retrying");
                false
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("Subscriber went away, detaching");
                slot.take();
                false
            }
        }
    }

    // ==================== Configuration ====================

    /// # Errors
    ///
    /// Returns `ConfigurationWriteFailure` if the write did not persist
    pub fn set_restricted_apps(&self, apps: &[AppId]) -> Result<(), GateError> {
        self.store
            .set_restricted_apps(apps)
            .map_err(|e| GateError::write(&e))
    }

    /// # Errors
    ///
    /// Returns `ConfigurationWriteFailure` if the write did not persist
    pub fn set_enabled(&self, enabled: bool) -> Result<(), GateError> {
        self.store
            .set_enabled(enabled)
            .map_err(|e| GateError::write(&e))
    }

    /// # Errors
    ///
    /// Returns `ConfigurationWriteFailure` if the write did not persist
    pub fn set_unlock_expiry(&self, expires_at_ms: i64) -> Result<(), GateError> {
        self.store
            .set_unlock_expiry(expires_at_ms)
            .map_err(|e| GateError::write(&e))
    }

    /// # Errors
    ///
    /// Returns `ConfigurationWriteFailure` if the write did not persist
    pub fn clear_unlock(&self) -> Result<(), GateError> {
        self.store
            .clear_unlock_expiry()
            .map_err(|e| GateError::write(&e))
    }

    /// Open an unlock window of `duration` from now; returns the expiry (epoch ms)
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationWriteFailure` if the expiry was not persisted
    pub fn grant_unlock(&self, duration: Duration) -> Result<i64, GateError> {
        let duration_ms = i64::try_from(duration.as_millis())
            .map_err(|_| GateError::Config("unlock duration too large".into()))?;
        let expires_at = self.clock.now_ms().saturating_add(duration_ms);
        self.set_unlock_expiry(expires_at)?;
        log::info!("Unlock granted for {} minutes", duration.as_secs() / 60);
        Ok(expires_at)
    }

    /// # Errors
    ///
    /// Returns `Storage` if the policy cannot be read
    pub fn policy(&self) -> Result<RestrictionPolicy, GateError> {
        self.store.get_policy().map_err(|e| GateError::storage(&e))
    }

    /// Whole minutes left in the current unlock window; zero when locked
    #[must_use]
    pub fn unlock_minutes_remaining(&self) -> u64 {
        match self.store.get_policy() {
            Ok(policy) => policy.unlock_minutes_remaining(self.clock.now_ms()),
            Err(e) => {
                log::warn!("Could not read unlock window: {e:#}");
                0
            }
        }
    }

    // ==================== Permissions ====================

    pub async fn has_foreground_permission(&self) -> bool {
        self.platform.usage.has_usage_permission().await
    }

    pub async fn has_redirect_permission(&self) -> bool {
        self.platform.redirector.has_redirect_permission().await
    }

    /// On-demand foreground sample outside the poll loop
    pub async fn get_foreground_app(&self) -> Option<AppId> {
        match self.detector.detect().await {
            Ok(sample) => sample.map(|s| s.app_id),
            Err(e) => {
                log::warn!("{e}");
                None
            }
        }
    }

    // ==================== Lifecycle ====================

    /// Start the in-process monitor. Succeeds without a second loop if one is
    /// already running.
    ///
    /// # Errors
    ///
    /// Returns `PermissionUnavailable` if foreground detection is not permitted
    pub async fn start_monitoring(&self) -> Result<(), GateError> {
        let mut monitor = self.monitor.lock().await;
        if monitor.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        let daemon = MonitorDaemon::new(
            self.store.clone(),
            &self.platform,
            &self.config,
            self.clock.clone(),
        )?;
        *monitor = Some(daemon.start().await?);
        Ok(())
    }

    /// Stop the in-process monitor; waits for an in-flight tick
    ///
    /// # Errors
    ///
    /// Returns `MonitorTask` if the loop had ended abnormally
    pub async fn stop_monitoring(&self) -> Result<(), GateError> {
        let handle = self.monitor.lock().await.take();
        match handle {
            Some(handle) => handle
                .stop()
                .await
                .map_err(|e| GateError::MonitorTask(e.to_string())),
            None => Ok(()),
        }
    }

    pub async fn monitor_state(&self) -> DaemonState {
        self.monitor
            .lock()
            .await
            .as_ref()
            .map_or(DaemonState::Stopped, MonitorHandle::state)
    }
}
