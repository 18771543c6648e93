//! First-time setup: policy store, config file, host app, permission check and auto-start

use anyhow::{Context, Result};
use monkgate_core::{
    config::{config_path, DEFAULT_HOST_APP_ID},
    GateConfig,
};
use monkgate_storage::{AppId, Database};
use std::path::{Path, PathBuf};

use super::helpers::{open_bridge, permission_label};

/// # Errors
///
/// Returns an error if the data directory, config file or database cannot be
/// created, or if `host` is not a valid app id
pub async fn init_command(autostart: bool, host: Option<String>) -> Result<()> {
    let explicit_host = host
        .as_deref()
        .map(|raw| AppId::parse(raw).with_context(|| format!("Invalid host app id '{raw}'")))
        .transpose()?;

    println!("Initializing monkgate...\n");

    // Step 1: Store and config
    println!("Step 1/4: Policy Store");
    println!("{}", "-".repeat(40));
    let (path, config) = setup_store()?;

    // Step 2: The app that blocked apps are redirected to
    println!("\nStep 2/4: Host App");
    println!("{}", "-".repeat(40));
    configure_host(&path, config, explicit_host).await?;

    // Step 3: Platform-specific permissions
    println!("\nStep 3/4: System Permissions");
    println!("{}", "-".repeat(40));
    check_permissions().await;

    // Step 4: Auto-start configuration
    println!("\nStep 4/4: Auto-start Configuration");
    println!("{}", "-".repeat(40));
    if autostart {
        if let Err(e) = setup_autostart() {
            println!("Warning: Could not configure auto-start: {e:#}");
            println!("You can start the monitor manually with: monkgate start");
        }
    } else {
        println!("Skipped. Re-run with --autostart to start the monitor on login.");
    }

    println!("\nSetup complete. Add restricted apps with: monkgate apps add <app-id>");
    Ok(())
}

fn setup_store() -> Result<(PathBuf, GateConfig)> {
    let path = config_path()?;
    let config = if path.exists() {
        // Validates the existing file
        let config = GateConfig::load(&path)?;
        println!("Using existing config: {}", path.display());
        config
    } else {
        let config = GateConfig::default();
        config.save(&path)?;
        println!("Wrote default config: {}", path.display());
        config
    };

    let db_path = Database::default_db_path();
    drop(Database::new(Some(db_path.clone()))?);
    println!("Policy store ready: {}", db_path.display());
    Ok((path, config))
}

/// Host to write into the config, if it should change. An explicit id always
/// wins; a sampled app only replaces the built-in placeholder.
fn choose_host(configured: &str, explicit: Option<AppId>, sampled: Option<AppId>) -> Option<AppId> {
    if explicit.is_some() {
        return explicit;
    }
    if configured == DEFAULT_HOST_APP_ID {
        sampled
    } else {
        None
    }
}

async fn configure_host(
    path: &Path,
    mut config: GateConfig,
    explicit: Option<AppId>,
) -> Result<()> {
    let sampled = if explicit.is_none() && config.host_app_id == DEFAULT_HOST_APP_ID {
        println!("Sampling the app in front now as the host app...");
        match open_bridge() {
            Ok(bridge) => bridge.get_foreground_app().await,
            Err(e) => {
                println!("Foreground sample unavailable: {e:#}");
                None
            }
        }
    } else {
        None
    };

    match choose_host(&config.host_app_id, explicit, sampled) {
        Some(host) => {
            config.host_app_id = host.to_string();
            config.save(path)?;
            println!("Host app set to {host}");
            println!("Blocked apps are sent back to it. To change it, run");
            println!("  monkgate init --host <app-id>");
            println!("or edit host_app_id in {}", path.display());
        }
        None if config.host_app_id == DEFAULT_HOST_APP_ID => {
            println!("Warning: host app is still the placeholder {DEFAULT_HOST_APP_ID}.");
            println!("Redirects will fail until it names an app that can take focus.");
            println!("Set it with: monkgate init --host <app-id>");
        }
        None => println!("Host app: {}", config.host_app_id),
    }
    Ok(())
}

async fn check_permissions() {
    match open_bridge() {
        Ok(bridge) => {
            let foreground = bridge.has_foreground_permission().await;
            let redirect = bridge.has_redirect_permission().await;
            println!("Foreground detection: {}", permission_label(foreground));
            println!("Focus redirect:       {}", permission_label(redirect));
            if !(foreground && redirect) {
                show_permission_guidance();
            }
        }
        Err(e) => println!("Permission check unavailable: {e:#}"),
    }
}

fn show_permission_guidance() {
    #[cfg(target_os = "macos")]
    {
        println!();
        println!("monkgate drives System Events to read and change the frontmost app.");
        println!("  1. Open System Settings > Privacy & Security > Automation");
        println!("  2. Allow your terminal app to control System Events");
        println!("  3. Also add it under Privacy & Security > Accessibility");
    }

    #[cfg(target_os = "linux")]
    {
        println!();
        println!("monkgate needs an X11 session (DISPLAY set) and xdotool on PATH.");
        println!("  Debian/Ubuntu: sudo apt install xdotool");
        println!("  Fedora:        sudo dnf install xdotool");
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        println!("Foreground enforcement is not supported on this platform.");
    }
}

// ============================================================================
// Auto-start configuration
// ============================================================================

const LAUNCH_AGENT_LABEL: &str = "com.monkmode.monkgate";

#[cfg(target_os = "macos")]
fn setup_autostart() -> Result<()> {
    use monkgate_core::config::get_data_dir;
    use std::{fs, process::Command};

    let exe = std::env::current_exe().context("Failed to get executable path")?;
    let data_dir = get_data_dir()?;
    let home_dir = dirs::home_dir().context("Failed to get home directory")?;

    let launch_agents_dir = home_dir.join("Library/LaunchAgents");
    let plist_path = launch_agents_dir.join(format!("{LAUNCH_AGENT_LABEL}.plist"));
    fs::create_dir_all(&launch_agents_dir)?;

    if plist_path.exists() {
        let _ = Command::new("launchctl")
            .arg("unload")
            .arg(&plist_path)
            .output();
    }

    fs::write(&plist_path, launch_agent_plist(&exe, &data_dir))?;
    println!("Created: {}", plist_path.display());

    let output = Command::new("launchctl")
        .arg("load")
        .arg(&plist_path)
        .output()?;
    if output.status.success() {
        println!("Auto-start enabled. The monitor will start on login.");
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        println!("Warning: launchctl load failed: {stderr}");
    }
    Ok(())
}

/// Launch agent that restarts the monitor if it exits abnormally
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn launch_agent_plist(exe: &Path, data_dir: &Path) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{LAUNCH_AGENT_LABEL}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{}</string>
        <string>daemon-internal-start</string>
    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <dict>
        <key>SuccessfulExit</key>
        <false/>
    </dict>
    <key>StandardErrorPath</key>
    <string>{}</string>
</dict>
</plist>
"#,
        exe.display(),
        data_dir.join("monkgate.err.log").display()
    )
}

#[cfg(target_os = "linux")]
fn setup_autostart() -> Result<()> {
    use monkgate_core::config::get_data_dir;
    use std::{fs, process::Command};

    let exe = std::env::current_exe().context("Failed to get executable path")?;
    let data_dir = get_data_dir()?;
    let home_dir = dirs::home_dir().context("Failed to get home directory")?;

    let systemd_dir = home_dir.join(".config/systemd/user");
    let service_path = systemd_dir.join("monkgate.service");
    fs::create_dir_all(&systemd_dir)?;

    fs::write(&service_path, systemd_unit(&exe, &data_dir))?;
    println!("Created: {}", service_path.display());

    let steps: [&[&str]; 3] = [
        &["--user", "daemon-reload"],
        &["--user", "enable", "monkgate.service"],
        &["--user", "start", "monkgate.service"],
    ];
    for args in steps {
        let status = Command::new("systemctl").args(args).status()?;
        if !status.success() {
            println!("Warning: systemctl {} failed", args.join(" "));
        }
    }

    println!("Auto-start enabled. The monitor will start on login.");
    Ok(())
}

/// User unit that restarts the monitor if it exits abnormally
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn systemd_unit(exe: &Path, data_dir: &Path) -> String {
    format!(
        "[Unit]
Description=monkgate restricted-app monitor
After=graphical-session.target

[Service]
Type=simple
Environment=MONKGATE_DATA_DIR={}
ExecStart={} daemon-internal-start
Restart=on-failure
RestartSec=5

[Install]
WantedBy=default.target
",
        data_dir.display(),
        exe.display()
    )
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn setup_autostart() -> Result<()> {
    anyhow::bail!("auto-start is not supported on this platform")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(id: &str) -> AppId {
        AppId::parse(id).unwrap()
    }

    #[test]
    fn test_sampled_host_replaces_placeholder() {
        assert_eq!(
            choose_host(DEFAULT_HOST_APP_ID, None, Some(app("org.gnome.Terminal"))),
            Some(app("org.gnome.Terminal"))
        );
        assert_eq!(choose_host(DEFAULT_HOST_APP_ID, None, None), None);
    }

    #[test]
    fn test_configured_host_is_kept() {
        assert_eq!(
            choose_host("com.example.focus", None, Some(app("org.gnome.Terminal"))),
            None
        );
    }

    #[test]
    fn test_explicit_host_wins() {
        assert_eq!(
            choose_host("com.example.focus", Some(app("Monkmode")), Some(app("Firefox"))),
            Some(app("Monkmode"))
        );
    }

    #[test]
    fn test_systemd_unit_runs_daemon() {
        let unit = systemd_unit(Path::new("/usr/bin/monkgate"), Path::new("/data"));
        assert!(unit.contains("ExecStart=/usr/bin/monkgate daemon-internal-start"));
        assert!(unit.contains("Environment=MONKGATE_DATA_DIR=/data"));
        assert!(unit.contains("Restart=on-failure"));
    }

    #[test]
    fn test_launch_agent_keeps_daemon_alive() {
        let plist = launch_agent_plist(Path::new("/Applications/monkgate"), Path::new("/data"));
        assert!(plist.contains("<string>/Applications/monkgate</string>"));
        assert!(plist.contains("<string>daemon-internal-start</string>"));
        assert!(plist.contains("/data/monkgate.err.log"));
    }
}
