/// Daemon lifecycle management commands
use anyhow::{Context, Result};
use monkgate_core::{
    clock::Clock,
    config::get_data_dir,
    daemon_control::DaemonControl,
    ipc::{IpcClient, IpcRequest, IpcResponse},
    supervisor::daemon_responds,
    create_platform, GateConfig, MonitorStatus, Supervisor, SystemClock,
};
use monkgate_storage::Database;
use std::{env, path::Path, process::Command, sync::Arc, time::Duration};
use sysinfo::{Pid, System};

use super::helpers::{format_duration, format_timestamp, open_bridge};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn is_process_alive(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_process(Pid::from_u32(pid))
}

pub async fn start_daemon(data_dir: &Path) -> Result<()> {
    let control = DaemonControl::new(data_dir);

    // 1. Check if daemon is already running, however it was launched
    if daemon_responds(&control).await {
        log::info!("Daemon is already running.");
        return Ok(());
    }
    match control.get_pid() {
        Ok(Some(pid)) if is_process_alive(pid) => {
            log::info!("Daemon is already running (PID: {pid}).");
            return Ok(());
        }
        Ok(None) => {}
        Ok(Some(_)) | Err(_) => {
            log::warn!("Removing stale PID file.");
        }
    }
    // Stale PID file or socket from a crashed daemon
    control.cleanup()?;

    log::info!("Starting monkgate daemon...");

    // 2. Spawn a new process for the daemon; it records its own PID
    let current_exe = env::current_exe()?;
    let child = Command::new(current_exe)
        .arg("daemon-internal-start")
        .current_dir(data_dir)
        .spawn()
        .context("Failed to spawn daemon process")?;

    log::info!("Daemon process started with PID: {}", child.id());
    Ok(())
}

pub async fn run_daemon_process() -> Result<()> {
    let control = DaemonControl::new(&get_data_dir()?);

    // New process: logging goes to the daemon log file
    setup_daemon_logging(&control.log_path())?;
    log::info!("Daemon process started internally.");

    let result = daemon_main_logic(control).await;
    if let Err(e) = &result {
        log::error!("Daemon main logic exited with a fatal error: {e:#}");
    }
    result
}

async fn daemon_main_logic(control: DaemonControl) -> Result<()> {
    let config = GateConfig::load_default()?;
    let store = Arc::new(Database::new(None)?);
    let platform = create_platform()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };
    Supervisor::new(store, platform, config, clock, control)
        .run(ctrl_c)
        .await
}

pub async fn stop_daemon(data_dir: &Path) -> Result<()> {
    let control = DaemonControl::new(data_dir);
    let pid = control.get_pid().unwrap_or_else(|e| {
        log::warn!("Ignoring unreadable PID file: {e:#}");
        None
    });

    if pid.is_none() && !control.sock_path().exists() {
        log::info!("Daemon is not running (no PID file or socket).");
        return Ok(());
    }

    match pid {
        Some(pid) => log::info!("Stopping monkgate daemon (PID: {pid})..."),
        None => log::info!("Stopping monkgate daemon..."),
    }
    let client = IpcClient::new(&control.sock_path());

    match client.send_command(IpcRequest::Shutdown).await {
        Ok(IpcResponse::Shutdown) => {
            log::info!("Daemon shutdown signal sent. Waiting for process to exit...");
            tokio::time::sleep(SHUTDOWN_GRACE).await;

            match pid {
                Some(pid) if is_process_alive(pid) => {
                    log::warn!("Daemon did not stop gracefully. Force killing...");
                    kill(pid);
                }
                _ => log::info!("Daemon stopped successfully."),
            }
        }
        Ok(resp) => log::error!("Received unexpected response from daemon: {resp:?}"),
        Err(e) => {
            log::error!("Failed to send shutdown command: {e}. Forcing cleanup.");
            if let Some(pid) = pid {
                kill(pid);
            }
        }
    }

    control.cleanup()
}

fn kill(pid: u32) {
    let mut sys = System::new();
    let pid = Pid::from_u32(pid);
    if sys.refresh_process(pid) {
        if let Some(process) = sys.process(pid) {
            process.kill();
            log::info!("Process killed.");
        }
    }
}

pub async fn show_status(data_dir: &Path) -> Result<()> {
    let control = DaemonControl::new(data_dir);
    let sock_path = control.sock_path();

    if !sock_path.exists() {
        println!("Daemon Status: Not running");
        return Ok(());
    }

    let client = IpcClient::new(&sock_path);
    match client.send_command(IpcRequest::Status).await {
        Ok(IpcResponse::Status(status)) => print_status(&status),
        Ok(_) => anyhow::bail!("Unexpected response from daemon"),
        Err(e) => {
            log::error!("Failed to get status: {e}");
            println!("Daemon Status: Not running (or not responding)");
        }
    }
    Ok(())
}

fn print_status(status: &MonitorStatus) {
    println!("Daemon Status: {}", status.state);
    println!("\nMonitor:");
    println!("  Ticks: {}", status.ticks);
    println!("  Failed ticks: {}", status.failed_ticks);
    println!("  Blocks: {}", status.triggers);
    println!(
        "  Last blocked: {}",
        status
            .last_blocked
            .as_ref()
            .map_or_else(|| "None".to_string(), ToString::to_string)
    );
    if let Some(last_tick) = status.last_tick_at {
        println!(
            "  Last tick: {}",
            format_timestamp(last_tick.timestamp_millis())
        );
    }
    if let Some(started) = status.started_at {
        let uptime = chrono::Utc::now().signed_duration_since(started);
        let seconds = u64::try_from(uptime.num_seconds()).unwrap_or(0);
        println!("\nUptime: {}", format_duration(seconds));
    }
}

/// Diagnostic foreground sample: asks the daemon if it runs, else samples locally
pub async fn show_foreground(data_dir: &Path) -> Result<()> {
    let sock_path = DaemonControl::new(data_dir).sock_path();

    let app = if sock_path.exists() {
        match IpcClient::new(&sock_path)
            .send_command(IpcRequest::Foreground)
            .await
        {
            Ok(IpcResponse::Foreground(app)) => app,
            Ok(_) => anyhow::bail!("Unexpected response from daemon"),
            Err(e) => {
                log::warn!("Daemon not responding ({e}); sampling locally");
                open_bridge()?.get_foreground_app().await
            }
        }
    } else {
        open_bridge()?.get_foreground_app().await
    };

    match app {
        Some(app) => println!("Foreground app: {app}"),
        None => println!("Foreground app: none (host app, nothing in window, or no permission)"),
    }
    Ok(())
}

fn setup_daemon_logging(log_path: &Path) -> Result<()> {
    use std::fs::{create_dir_all, OpenOptions};

    if let Some(parent) = log_path.parent() {
        create_dir_all(parent)?;
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .context("Failed to open daemon log")?;

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter_level(log::LevelFilter::Debug)
        .init();

    Ok(())
}
