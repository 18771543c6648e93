pub mod bridge;
pub mod clock;
pub mod config;
pub mod daemon;
pub mod daemon_control;
pub mod debounce;
pub mod detector;
pub mod enforcement;
pub mod error;
pub mod ipc;
pub mod platform;
pub mod supervisor;

pub use bridge::{BlockedEvent, Bridge, DeliveryOutcome};
pub use clock::{Clock, SystemClock};
pub use config::GateConfig;
pub use daemon::{DaemonState, MonitorDaemon, MonitorHandle, MonitorStatus, TickOutcome};
pub use error::GateError;
pub use platform::{create_platform, Platform};
pub use supervisor::Supervisor;
