use anyhow::Result;
use async_trait::async_trait;
use monkgate_storage::AppId;
use std::sync::Arc;

use crate::error::GateError;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "linux")]
pub mod linux;

/// A focus change reported by the platform usage facility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusEvent {
    pub app_id: AppId,
    /// Epoch milliseconds
    pub at_ms: i64,
}

/// Platform usage-tracking facility
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Whether foreground queries are permitted. Never fails.
    async fn has_usage_permission(&self) -> bool;

    /// Focus events between `since_ms` and `until_ms`, oldest first.
    /// Backends that can only sample the current focus return a single event
    /// stamped `until_ms`. A refused query fails with [`PermissionDenied`].
    async fn focus_events(&self, since_ms: i64, until_ms: i64) -> Result<Vec<FocusEvent>>;
}

/// The platform refused a query for lack of permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("permission denied by the platform")]
pub struct PermissionDenied;

/// Brings an application to the foreground
#[async_trait]
pub trait FocusRedirector: Send + Sync {
    /// Whether focus redirection is permitted. Never fails.
    async fn has_redirect_permission(&self) -> bool;

    /// Request focus for `app`. Succeeds if `app` already has focus.
    async fn bring_to_front(&self, app: &AppId) -> Result<()>;
}

/// Platform backend pair used by the detector and the enforcement action
#[derive(Clone)]
pub struct Platform {
    pub usage: Arc<dyn UsageSource>,
    pub redirector: Arc<dyn FocusRedirector>,
}

/// Create the platform-specific backend
///
/// # Errors
///
/// Returns an error if the current platform is not supported
pub fn create_platform() -> Result<Platform, GateError> {
    #[cfg(target_os = "macos")]
    {
        let backend = Arc::new(macos::MacOSPlatform::new());
        Ok(Platform {
            usage: backend.clone(),
            redirector: backend,
        })
    }

    #[cfg(target_os = "linux")]
    {
        let backend = Arc::new(linux::LinuxPlatform::new());
        Ok(Platform {
            usage: backend.clone(),
            redirector: backend,
        })
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        Err(GateError::UnsupportedPlatform)
    }
}

/// First line of a command's stdout, trimmed
#[cfg_attr(
    not(any(target_os = "macos", target_os = "linux")),
    allow(dead_code)
)]
pub(crate) fn first_line(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
#[allow(dead_code)]
pub(crate) mod testing {
    use super::{FocusEvent, FocusRedirector, PermissionDenied, UsageSource};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use monkgate_storage::AppId;
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    };

    /// Usage source replaying whatever focus events the test sets
    #[derive(Default)]
    pub struct ScriptedUsage {
        events: Mutex<Vec<FocusEvent>>,
        denied: AtomicBool,
        failing: AtomicBool,
        panicking: AtomicBool,
        pub queries: AtomicUsize,
    }

    impl ScriptedUsage {
        pub fn new() -> Self {
            Self::default()
        }

        /// Replace the event log with a single focus of `app` at `at_ms`
        pub fn focus(&self, app: &str, at_ms: i64) {
            *self.events.lock().unwrap() = vec![FocusEvent {
                app_id: AppId::parse(app).unwrap(),
                at_ms,
            }];
        }

        pub fn push(&self, app: &str, at_ms: i64) {
            self.events.lock().unwrap().push(FocusEvent {
                app_id: AppId::parse(app).unwrap(),
                at_ms,
            });
        }

        pub fn clear(&self) {
            self.events.lock().unwrap().clear();
        }

        pub fn set_denied(&self, denied: bool) {
            self.denied.store(denied, Ordering::SeqCst);
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Make queries panic, taking down the task that runs them
        pub fn set_panicking(&self, panicking: bool) {
            self.panicking.store(panicking, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl UsageSource for ScriptedUsage {
        async fn has_usage_permission(&self) -> bool {
            !self.denied.load(Ordering::SeqCst)
        }

        async fn focus_events(&self, since_ms: i64, until_ms: i64) -> Result<Vec<FocusEvent>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            assert!(
                !self.panicking.load(Ordering::SeqCst),
                "usage service crashed"
            );
            if self.denied.load(Ordering::SeqCst) {
                return Err(PermissionDenied.into());
            }
            if self.failing.load(Ordering::SeqCst) {
                bail!("usage service unavailable");
            }
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.at_ms >= since_ms && e.at_ms <= until_ms)
                .cloned()
                .collect())
        }
    }

    /// Redirector that records requests
    #[derive(Default)]
    pub struct RecordingRedirector {
        pub redirects: Mutex<Vec<AppId>>,
        denied: AtomicBool,
        failing: AtomicBool,
    }

    impl RecordingRedirector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn count(&self) -> usize {
            self.redirects.lock().unwrap().len()
        }

        pub fn set_denied(&self, denied: bool) {
            self.denied.store(denied, Ordering::SeqCst);
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl FocusRedirector for RecordingRedirector {
        async fn has_redirect_permission(&self) -> bool {
            !self.denied.load(Ordering::SeqCst)
        }

        async fn bring_to_front(&self, app: &AppId) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                bail!("window server refused activation");
            }
            self.redirects.lock().unwrap().push(app.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_line_trims_output() {
        assert_eq!(
            first_line(b"  com.example.social \nsecond\n"),
            Some("com.example.social".to_string())
        );
        assert_eq!(first_line(b"\n"), None);
        assert_eq!(first_line(b""), None);
    }
}
