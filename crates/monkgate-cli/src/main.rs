mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{
    daemon::{run_daemon_process, show_foreground, show_status, start_daemon, stop_daemon},
    init::init_command,
    policy::{
        handle_apps_command, handle_unlock_command, reset, set_enabled, show_permissions,
        show_policy, AppsActionType, UnlockActionType,
    },
    watch::watch_command,
};
use monkgate_core::config::{get_data_dir, DEFAULT_UNLOCK_MINUTES};

#[derive(Parser)]
#[command(name = "monkgate")]
#[command(about = "Keeps restricted apps out of the foreground", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// First-time setup: config, policy store, permission check
    Init {
        /// Install a login service that keeps the monitor running
        #[arg(long)]
        autostart: bool,
        /// App to return focus to (default: the app in front during init)
        #[arg(long, value_name = "APP_ID")]
        host: Option<String>,
    },
    /// Start the monitor daemon
    Start,
    /// (Internal) Run the daemon process
    #[command(hide = true)]
    DaemonInternalStart,
    /// Stop the monitor daemon
    Stop,
    /// Show daemon state and block counts
    Status,
    /// Show the restriction policy
    Policy,
    /// Edit the restricted app list
    Apps {
        #[command(subcommand)]
        action: AppsAction,
    },
    /// Turn protection on
    Enable,
    /// Turn protection off
    Disable,
    /// Manage the temporary unlock window
    Unlock {
        #[command(subcommand)]
        action: UnlockAction,
    },
    /// Report foreground-detection and redirect permissions
    Permissions,
    /// Sample the current foreground app (diagnostic)
    Foreground,
    /// Receive blocked events the way the host UI does
    Watch {
        /// Activation check interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        wake_ms: u64,
        /// Also run the monitor in this process
        #[arg(long)]
        monitor: bool,
    },
    /// Remove all policy data and any pending block
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum AppsAction {
    /// Replace the list
    Set {
        #[arg(required = true)]
        apps: Vec<String>,
    },
    /// Add apps to the list
    Add {
        #[arg(required = true)]
        apps: Vec<String>,
    },
    /// Remove apps from the list
    Remove {
        #[arg(required = true)]
        apps: Vec<String>,
    },
    /// Empty the list
    Clear,
}

#[derive(Subcommand, Debug)]
enum UnlockAction {
    /// Unlock for a number of minutes from now
    Grant {
        #[arg(short, long, default_value_t = DEFAULT_UNLOCK_MINUTES)]
        minutes: u64,
    },
    /// Unlock until an absolute time (epoch milliseconds; 0 clears)
    At { expires_at_ms: i64 },
    /// End the unlock window now
    Clear,
}

impl From<AppsAction> for AppsActionType {
    fn from(action: AppsAction) -> Self {
        match action {
            AppsAction::Set { apps } => Self::Set { apps },
            AppsAction::Add { apps } => Self::Add { apps },
            AppsAction::Remove { apps } => Self::Remove { apps },
            AppsAction::Clear => Self::Clear,
        }
    }
}

impl From<UnlockAction> for UnlockActionType {
    fn from(action: UnlockAction) -> Self {
        match action {
            UnlockAction::Grant { minutes } => Self::Grant { minutes },
            UnlockAction::At { expires_at_ms } => Self::At { expires_at_ms },
            UnlockAction::Clear => Self::Clear,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !matches!(cli.command, Commands::DaemonInternalStart) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_secs()
            .init();
    }

    let data_dir = get_data_dir()?;

    match cli.command {
        Commands::Init { autostart, host } => init_command(autostart, host).await,
        Commands::Start => start_daemon(&data_dir).await,
        Commands::DaemonInternalStart => run_daemon_process().await,
        Commands::Stop => stop_daemon(&data_dir).await,
        Commands::Status => show_status(&data_dir).await,
        Commands::Policy => show_policy(),
        Commands::Apps { action } => handle_apps_command(&action.into()),
        Commands::Enable => set_enabled(true),
        Commands::Disable => set_enabled(false),
        Commands::Unlock { action } => handle_unlock_command(&action.into()),
        Commands::Permissions => show_permissions().await,
        Commands::Foreground => show_foreground(&data_dir).await,
        Commands::Watch { wake_ms, monitor } => watch_command(wake_ms, monitor).await,
        Commands::Reset { yes } => reset(yes),
    }
}
