use chrono::{DateTime, Utc};
use monkgate_storage::{AppId, Database};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::{JoinError, JoinHandle},
    time::{interval, MissedTickBehavior},
};

use crate::{
    clock::Clock,
    config::GateConfig,
    debounce::Debouncer,
    detector::{ForegroundDetector, HostFilter},
    enforcement::EnforcementAction,
    error::GateError,
    platform::Platform,
};

/// Monitor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DaemonState {
    Stopped,
    Starting,
    Polling,
    /// Disabled or inside an unlock window; the timer keeps running
    Suspended,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Polling => "polling",
            Self::Suspended => "suspended",
        };
        f.write_str(label)
    }
}

/// Which step of the poll algorithm ended a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Disabled,
    Unlocked,
    NoRestrictedApps,
    NoSample,
    NotRestricted(AppId),
    Debounced(AppId),
    Triggered(AppId),
    Failed,
}

/// Snapshot published after every tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub state: DaemonState,
    pub ticks: u64,
    pub triggers: u64,
    pub failed_ticks: u64,
    pub last_blocked: Option<AppId>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self {
            state: DaemonState::Stopped,
            ticks: 0,
            triggers: 0,
            failed_ticks: 0,
            last_blocked: None,
            started_at: None,
            last_tick_at: None,
        }
    }
}

/// Fixed-interval poll loop applying the restriction policy
pub struct MonitorDaemon {
    store: Arc<Database>,
    detector: ForegroundDetector,
    enforcement: EnforcementAction,
    debouncer: Debouncer,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    status: watch::Sender<MonitorStatus>,
}

impl MonitorDaemon {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    pub fn new(
        store: Arc<Database>,
        platform: &Platform,
        config: &GateConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GateError> {
        config.validate()?;
        let host = config.host_app()?;
        let detector = ForegroundDetector::new(
            platform.usage.clone(),
            HostFilter::new(host.clone()),
            clock.clone(),
            config.lookback(),
        );
        let enforcement =
            EnforcementAction::new(store.clone(), platform.redirector.clone(), host, clock.clone());
        let (status, _) = watch::channel(MonitorStatus::default());

        Ok(Self {
            store,
            detector,
            enforcement,
            debouncer: Debouncer::new(config.debounce()),
            clock,
            poll_interval: config.poll_interval(),
            status,
        })
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<MonitorStatus> {
        self.status.subscribe()
    }

    /// Check permission, load the policy once, and spawn the poll loop.
    ///
    /// # Errors
    ///
    /// Returns `PermissionUnavailable` if foreground detection is not permitted,
    /// or `Storage` if the policy cannot be read
    pub async fn start(self) -> Result<MonitorHandle, GateError> {
        self.set_state(DaemonState::Starting);

        if !self.detector.has_permission().await {
            self.set_state(DaemonState::Stopped);
            return Err(GateError::PermissionUnavailable("foreground usage access"));
        }

        let policy = match self.store.get_policy() {
            Ok(policy) => policy,
            Err(e) => {
                self.set_state(DaemonState::Stopped);
                return Err(GateError::storage(&e));
            }
        };
        log::info!(
            "Monitor starting: {} restricted apps, enabled={}, host={}, interval={}ms",
            policy.restricted_apps.len(),
            policy.enabled,
            self.detector.filter().host(),
            self.poll_interval.as_millis()
        );

        let (stop, stop_rx) = watch::channel(false);
        let status = self.status.subscribe();
        self.status.send_modify(|s| s.started_at = Some(Utc::now()));
        let task = tokio::spawn(self.run(stop_rx));

        Ok(MonitorHandle {
            stop,
            status,
            task: Some(task),
        })
    }

    async fn run(mut self, mut stop: watch::Receiver<bool>) {
        let mut ticker = interval(self.poll_interval);
        // A slow tick delays the next one; ticks never overlap or burst
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.set_state(DaemonState::Polling);
        log::info!("Monitor polling");

        loop {
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    // Awaited here, so a stop request never interrupts it
                    let outcome = self.tick().await;
                    self.record(&outcome);
                }
            }
        }

        self.set_state(DaemonState::Stopped);
        log::info!("Monitor stopped");
    }

    /// Run one poll step. Failures are logged and reported as `Failed`.
    pub async fn tick(&mut self) -> TickOutcome {
        match self.evaluate().await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Monitor tick failed: {e}");
                TickOutcome::Failed
            }
        }
    }

    async fn evaluate(&mut self) -> Result<TickOutcome, GateError> {
        // Re-read every tick so edits from the UI apply without a restart
        let policy = self.store.get_policy().map_err(|e| GateError::storage(&e))?;

        if !policy.enabled {
            self.set_state(DaemonState::Suspended);
            return Ok(TickOutcome::Disabled);
        }
        if policy.is_unlocked_at(self.clock.now_ms()) {
            self.set_state(DaemonState::Suspended);
            return Ok(TickOutcome::Unlocked);
        }
        self.set_state(DaemonState::Polling);

        if policy.restricted_apps.is_empty() {
            return Ok(TickOutcome::NoRestrictedApps);
        }

        let sample = match self.detector.detect().await {
            Ok(Some(sample)) => sample,
            Ok(None) => return Ok(TickOutcome::NoSample),
            Err(e) => {
                log::warn!("{e}");
                return Ok(TickOutcome::NoSample);
            }
        };
        if self.detector.filter().is_host(&sample.app_id) {
            return Ok(TickOutcome::NoSample);
        }

        if !policy.is_restricted(sample.app_id.as_str()) {
            return Ok(TickOutcome::NotRestricted(sample.app_id));
        }

        if !self
            .debouncer
            .should_trigger(&sample.app_id, self.clock.now_ms())
        {
            log::debug!("Debounced {}", sample.app_id);
            return Ok(TickOutcome::Debounced(sample.app_id));
        }

        self.enforcement.trigger(&sample.app_id).await?;
        Ok(TickOutcome::Triggered(sample.app_id))
    }

    fn record(&self, outcome: &TickOutcome) {
        self.status.send_modify(|s| {
            s.ticks += 1;
            s.last_tick_at = Some(Utc::now());
            match outcome {
                TickOutcome::Triggered(app) => {
                    s.triggers += 1;
                    s.last_blocked = Some(app.clone());
                }
                TickOutcome::Failed => s.failed_ticks += 1,
                _ => {}
            }
        });
    }

    fn set_state(&self, state: DaemonState) {
        self.status.send_if_modified(|s| {
            if s.state == state {
                return false;
            }
            log::debug!("Monitor state {} -> {state}", s.state);
            s.state = state;
            true
        });
    }
}

/// Handle to a running monitor loop
pub struct MonitorHandle {
    stop: watch::Sender<bool>,
    status: watch::Receiver<MonitorStatus>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    #[must_use]
    pub fn status(&self) -> MonitorStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn state(&self) -> DaemonState {
        self.status.borrow().state
    }

    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<MonitorStatus> {
        self.status.clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Resolves when the loop task exits on its own (e.g. it panicked).
    /// Pending forever once the task has already been joined.
    ///
    /// # Errors
    ///
    /// Returns the join error if the task panicked
    pub async fn finished(&mut self) -> Result<(), JoinError> {
        match self.task.as_mut() {
            Some(task) => {
                let result = task.await;
                self.task = None;
                result
            }
            None => std::future::pending().await,
        }
    }

    /// Stop scheduling new ticks and wait for an in-flight tick to finish
    ///
    /// # Errors
    ///
    /// Returns the join error if the loop task panicked
    pub async fn stop(mut self) -> Result<(), JoinError> {
        let _ = self.stop.send(true);
        match self.task.take() {
            Some(task) => task.await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        platform::testing::{RecordingRedirector, ScriptedUsage},
    };

    const START_MS: i64 = 1_700_000_000_000;

    struct Harness {
        store: Arc<Database>,
        usage: Arc<ScriptedUsage>,
        redirector: Arc<RecordingRedirector>,
        clock: Arc<ManualClock>,
        daemon: MonitorDaemon,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(Database::open_in_memory().unwrap());
            let usage = Arc::new(ScriptedUsage::new());
            let redirector = Arc::new(RecordingRedirector::new());
            let clock = Arc::new(ManualClock::new(START_MS));
            let platform = Platform {
                usage: usage.clone(),
                redirector: redirector.clone(),
            };
            let daemon =
                MonitorDaemon::new(store.clone(), &platform, &GateConfig::default(), clock.clone())
                    .unwrap();
            Self {
                store,
                usage,
                redirector,
                clock,
                daemon,
            }
        }

        fn restrict(&self, ids: &[&str]) {
            let apps: Vec<AppId> = ids.iter().map(|id| AppId::parse(id).unwrap()).collect();
            self.store.set_restricted_apps(&apps).unwrap();
        }

        /// Focus `app` at the current clock time and run one tick
        async fn sample(&mut self, app: &str) -> TickOutcome {
            self.usage.focus(app, self.clock.now_ms());
            self.daemon.tick().await
        }

        fn advance_secs(&self, secs: u64) {
            self.clock.advance(Duration::from_secs(secs));
        }
    }

    fn app(id: &str) -> AppId {
        AppId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn test_scenario_debounce_within_three_seconds() {
        let mut h = Harness::new();
        h.restrict(&["app.social"]);

        assert_eq!(h.sample("app.social").await, TickOutcome::Triggered(app("app.social")));
        h.advance_secs(1);
        assert_eq!(h.sample("app.social").await, TickOutcome::Debounced(app("app.social")));
        h.advance_secs(4);
        assert_eq!(h.sample("app.social").await, TickOutcome::Triggered(app("app.social")));

        assert_eq!(h.redirector.count(), 2);
    }

    #[tokio::test]
    async fn test_scenario_unlock_window_suppresses_then_resumes() {
        let mut h = Harness::new();
        h.restrict(&["app.social"]);
        h.store
            .set_unlock_expiry(START_MS + 20 * 60 * 1_000)
            .unwrap();

        for _ in 0..20 {
            assert_eq!(h.sample("app.social").await, TickOutcome::Unlocked);
            h.advance_secs(59);
        }
        assert_eq!(h.redirector.count(), 0);
        assert_eq!(h.daemon.status.borrow().state, DaemonState::Suspended);

        h.advance_secs(60);
        assert_eq!(h.sample("app.social").await, TickOutcome::Triggered(app("app.social")));
        assert_eq!(h.redirector.count(), 1);
        assert_eq!(h.daemon.status.borrow().state, DaemonState::Polling);
    }

    #[tokio::test]
    async fn test_scenario_disable_and_reenable() {
        let mut h = Harness::new();
        h.restrict(&["app.social"]);
        h.store.set_enabled(false).unwrap();

        for _ in 0..5 {
            assert_eq!(h.sample("app.social").await, TickOutcome::Disabled);
            h.advance_secs(1);
        }
        assert_eq!(h.redirector.count(), 0);

        h.store.set_enabled(true).unwrap();
        assert_eq!(h.sample("app.social").await, TickOutcome::Triggered(app("app.social")));
    }

    #[tokio::test]
    async fn test_disabled_never_triggers_for_any_samples() {
        let mut h = Harness::new();
        h.restrict(&["app.social", "app.video"]);
        h.store.set_enabled(false).unwrap();

        for id in ["app.social", "app.video", "com.monkmode.app", "app.notes"] {
            for _ in 0..4 {
                h.sample(id).await;
                h.advance_secs(2);
            }
        }
        assert_eq!(h.redirector.count(), 0);
        assert!(h.store.peek_pending_block().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_unlock_does_not_suppress() {
        let mut h = Harness::new();
        h.restrict(&["app.social"]);
        h.store.set_unlock_expiry(START_MS - 1).unwrap();

        assert_eq!(h.sample("app.social").await, TickOutcome::Triggered(app("app.social")));
    }

    #[tokio::test]
    async fn test_empty_restricted_set_skips_detection() {
        let mut h = Harness::new();
        assert_eq!(h.sample("app.social").await, TickOutcome::NoRestrictedApps);
        assert_eq!(h.usage.queries.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unrestricted_and_host_samples_skip() {
        let mut h = Harness::new();
        h.restrict(&["app.social"]);

        assert_eq!(h.sample("app.notes").await, TickOutcome::NotRestricted(app("app.notes")));
        assert_eq!(h.sample("com.monkmode.app").await, TickOutcome::NoSample);
        h.usage.clear();
        assert_eq!(h.daemon.tick().await, TickOutcome::NoSample);
        assert_eq!(h.redirector.count(), 0);
    }

    #[tokio::test]
    async fn test_policy_edits_apply_on_next_tick() {
        let mut h = Harness::new();
        h.restrict(&["app.video"]);
        assert_eq!(h.sample("app.social").await, TickOutcome::NotRestricted(app("app.social")));

        h.restrict(&["app.social"]);
        assert_eq!(h.sample("app.social").await, TickOutcome::Triggered(app("app.social")));
    }

    #[tokio::test]
    async fn test_detector_failure_does_not_stop_polling() {
        let mut h = Harness::new();
        h.restrict(&["app.social"]);
        h.usage.focus("app.social", h.clock.now_ms());
        h.usage.set_failing(true);

        assert_eq!(h.daemon.tick().await, TickOutcome::NoSample);
        assert_eq!(h.daemon.tick().await, TickOutcome::NoSample);

        h.usage.set_failing(false);
        assert_eq!(h.sample("app.social").await, TickOutcome::Triggered(app("app.social")));
    }

    #[tokio::test]
    async fn test_permission_loss_yields_noop_ticks() {
        let mut h = Harness::new();
        h.restrict(&["app.social"]);
        h.usage.set_denied(true);

        assert_eq!(h.sample("app.social").await, TickOutcome::NoSample);
        assert_eq!(h.daemon.status.borrow().state, DaemonState::Polling);

        h.usage.set_denied(false);
        assert_eq!(h.sample("app.social").await, TickOutcome::Triggered(app("app.social")));
    }

    #[tokio::test]
    async fn test_redirect_failure_reported_as_failed_tick() {
        let mut h = Harness::new();
        h.restrict(&["app.social"]);
        h.redirector.set_failing(true);

        assert_eq!(h.sample("app.social").await, TickOutcome::Failed);
        // Signal was written before the redirect attempt
        assert!(h.store.peek_pending_block().unwrap().is_some());
        // Debounce state was updated before triggering
        h.redirector.set_failing(false);
        assert_eq!(h.sample("app.social").await, TickOutcome::Debounced(app("app.social")));
    }

    #[tokio::test]
    async fn test_start_requires_permission() {
        let h = Harness::new();
        h.usage.set_denied(true);
        let status = h.daemon.subscribe_status();

        let result = h.daemon.start().await;

        assert!(matches!(result, Err(GateError::PermissionUnavailable(_))));
        assert_eq!(status.borrow().state, DaemonState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_loop_triggers_and_stops() {
        let h = Harness::new();
        h.restrict(&["app.social"]);
        h.usage.focus("app.social", START_MS);
        let Harness {
            store, redirector, daemon, ..
        } = h;

        let handle = daemon.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        let status = handle.status();
        assert_eq!(status.state, DaemonState::Polling);
        assert!(status.ticks >= 3);
        // Manual clock never advances, so the debounce window holds
        assert_eq!(status.triggers, 1);
        assert_eq!(status.last_blocked, Some(app("app.social")));
        assert_eq!(redirector.count(), 1);
        assert!(store.peek_pending_block().unwrap().is_some());

        let receiver = handle.status_receiver();
        handle.stop().await.unwrap();
        assert_eq!(receiver.borrow().state, DaemonState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_keeps_running_while_suspended() {
        let h = Harness::new();
        h.restrict(&["app.social"]);
        h.store.set_enabled(false).unwrap();
        h.usage.focus("app.social", START_MS);
        let Harness {
            store, redirector, daemon, ..
        } = h;

        let handle = daemon.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(handle.state(), DaemonState::Suspended);
        assert_eq!(redirector.count(), 0);

        store.set_enabled(true).unwrap();
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(handle.state(), DaemonState::Polling);
        assert_eq!(redirector.count(), 1);
        assert!(!handle.is_finished());

        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reports_crashed_loop() {
        let h = Harness::new();
        h.restrict(&["app.social"]);
        h.usage.set_panicking(true);
        let Harness { daemon, .. } = h;

        let handle = daemon.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(handle.is_finished());

        let err = handle.stop().await.unwrap_err();
        assert!(err.is_panic());
    }
}
