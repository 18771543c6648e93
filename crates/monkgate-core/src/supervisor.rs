//! Body of the daemon process.
//!
//! The supervisor owns the PID file and the IPC socket for as long as it runs,
//! and keeps one monitor loop alive: a loop that fails to start or crashes is
//! retried after a fixed delay until shutdown is requested.

use anyhow::{bail, Result};
use monkgate_storage::Database;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinError, time::sleep};

use crate::{
    clock::Clock,
    config::{GateConfig, DEFAULT_HOST_APP_ID},
    daemon::{DaemonState, MonitorDaemon, MonitorHandle, MonitorStatus},
    daemon_control::DaemonControl,
    detector::{ForegroundDetector, HostFilter},
    error::GateError,
    ipc::{listen, DaemonIpcHandler, IpcClient, IpcRequest, IpcResponse},
    platform::Platform,
};

/// Pause before restarting a monitor loop that died or failed to start
pub const RESTART_DELAY: Duration = Duration::from_secs(2);

pub struct Supervisor {
    store: Arc<Database>,
    platform: Platform,
    config: GateConfig,
    clock: Arc<dyn Clock>,
    control: DaemonControl,
    restart_delay: Duration,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        store: Arc<Database>,
        platform: Platform,
        config: GateConfig,
        clock: Arc<dyn Clock>,
        control: DaemonControl,
    ) -> Self {
        Self {
            store,
            platform,
            config,
            clock,
            control,
            restart_delay: RESTART_DELAY,
        }
    }

    /// Run the daemon until an IPC shutdown or until `external` resolves.
    ///
    /// Writes this process's PID at startup and removes the PID file and
    /// socket on exit.
    ///
    /// # Errors
    ///
    /// Returns an error if another daemon answers on the socket, the PID file
    /// cannot be written, or the configuration is invalid
    pub async fn run(self, external: impl Future<Output = ()>) -> Result<()> {
        if daemon_responds(&self.control).await {
            bail!(
                "another daemon is already serving {}",
                self.control.sock_path().display()
            );
        }
        self.config.validate()?;
        if self.config.host_app_id == DEFAULT_HOST_APP_ID {
            log::warn!(
                "host_app_id is the placeholder {DEFAULT_HOST_APP_ID}; redirects will fail until it is set"
            );
        }

        self.control.write_pid(std::process::id())?;
        log::info!("Daemon running with PID {}", std::process::id());

        let result = self.serve(external).await;
        if let Err(e) = self.control.cleanup() {
            log::warn!("Daemon cleanup failed: {e:#}");
        }
        result
    }

    async fn serve(&self, external: impl Future<Output = ()>) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handler = Arc::new(self.ipc_handler(shutdown_tx)?);

        let sock_path = self.control.sock_path();
        let listener_handler = handler.clone();
        let listener = tokio::spawn(async move {
            if let Err(e) = listen(listener_handler, &sock_path).await {
                log::error!("IPC listener failed: {e}");
            }
        });
        log::info!("Daemon started with signal handling and IPC");

        self.supervise(&handler, shutdown_rx, external).await;

        listener.abort();
        log::info!("Daemon shut down gracefully.");
        Ok(())
    }

    fn ipc_handler(&self, shutdown: watch::Sender<bool>) -> Result<DaemonIpcHandler, GateError> {
        let detector = Arc::new(ForegroundDetector::new(
            self.platform.usage.clone(),
            HostFilter::new(self.config.host_app()?),
            self.clock.clone(),
            self.config.lookback(),
        ));
        Ok(DaemonIpcHandler::new(
            idle_status(MonitorStatus::default()),
            detector,
            shutdown,
        ))
    }

    async fn start_monitor(&self) -> Result<MonitorHandle, GateError> {
        let daemon = MonitorDaemon::new(
            self.store.clone(),
            &self.platform,
            &self.config,
            self.clock.clone(),
        )?;
        daemon.start().await
    }

    /// Keep a monitor running until shutdown. Start failures and crashes are
    /// logged and retried after `restart_delay`.
    async fn supervise(
        &self,
        handler: &DaemonIpcHandler,
        mut shutdown: watch::Receiver<bool>,
        external: impl Future<Output = ()>,
    ) {
        let mut external = std::pin::pin!(external);
        let mut monitor: Option<MonitorHandle> = None;
        let mut retry_due = true;
        let mut failures: u32 = 0;

        loop {
            if monitor.is_none() && retry_due {
                retry_due = false;
                match self.start_monitor().await {
                    Ok(handle) => {
                        if failures > 0 {
                            log::info!("Monitor started after {failures} failed attempts");
                        }
                        failures = 0;
                        handler.replace_status(handle.status_receiver());
                        monitor = Some(handle);
                    }
                    Err(e) => {
                        failures += 1;
                        log::warn!(
                            "Monitor start failed (attempt {failures}): {e}; retrying in {}ms",
                            self.restart_delay.as_millis()
                        );
                    }
                }
            }

            tokio::select! {
                biased;
                () = &mut external => {
                    log::info!("Received Ctrl-C, shutting down...");
                    break;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                result = wait_finished(monitor.as_mut()) => {
                    match result {
                        Err(e) => log::error!("Monitor loop crashed: {e}; restarting"),
                        Ok(()) => log::warn!("Monitor loop exited unexpectedly; restarting"),
                    }
                    monitor = None;
                    handler.replace_status(idle_status(handler.current_status()));
                }
                () = sleep(self.restart_delay), if monitor.is_none() => {
                    retry_due = true;
                }
            }
        }

        if let Some(handle) = monitor {
            if let Err(e) = handle.stop().await {
                log::error!("Monitor task ended abnormally: {e}");
            }
        }
    }
}

/// Whether a daemon answers status requests on the control socket
pub async fn daemon_responds(control: &DaemonControl) -> bool {
    let sock_path = control.sock_path();
    if !sock_path.exists() {
        return false;
    }
    matches!(
        IpcClient::new(&sock_path)
            .send_command(IpcRequest::Status)
            .await,
        Ok(IpcResponse::Status(_))
    )
}

async fn wait_finished(monitor: Option<&mut MonitorHandle>) -> Result<(), JoinError> {
    match monitor {
        Some(handle) => handle.finished().await,
        None => std::future::pending().await,
    }
}

/// Status source for when no loop is running; keeps the last counters
fn idle_status(last: MonitorStatus) -> watch::Receiver<MonitorStatus> {
    let (_, rx) = watch::channel(MonitorStatus {
        state: DaemonState::Stopped,
        ..last
    });
    rx
}
