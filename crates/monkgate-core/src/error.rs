use monkgate_storage::{AppId, AppIdError};
use thiserror::Error;

/// Errors surfaced at the enforcement subsystem boundary
#[derive(Debug, Error)]
pub enum GateError {
    /// Foreground-detection or redirect permission not granted
    #[error("permission unavailable: {0}")]
    PermissionUnavailable(&'static str),

    /// The platform usage query failed for one tick
    #[error("foreground detection failed: {0}")]
    DetectionTransientFailure(String),

    /// No subscriber received the event within the retry budget
    #[error("blocked event for {blocked_app} not delivered after {attempts} attempts")]
    DeliveryExhausted { blocked_app: AppId, attempts: u32 },

    /// A policy write did not persist; protection must not be assumed active
    #[error("configuration write failed: {0}")]
    ConfigurationWriteFailure(String),

    #[error("focus redirect failed: {0}")]
    RedirectFailed(String),

    /// The monitor loop ended abnormally
    #[error("monitor task failed: {0}")]
    MonitorTask(String),

    #[error("policy store error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unsupported platform")]
    UnsupportedPlatform,

    #[error(transparent)]
    InvalidAppId(#[from] AppIdError),
}

impl GateError {
    pub(crate) fn storage(e: &anyhow::Error) -> Self {
        Self::Storage(format!("{e:#}"))
    }

    pub(crate) fn write(e: &anyhow::Error) -> Self {
        Self::ConfigurationWriteFailure(format!("{e:#}"))
    }
}
