use monkgate_storage::AppId;
use std::time::Duration;

/// Suppresses repeated triggers for the same app within a window.
/// In-memory only; owned by the monitor daemon.
#[derive(Debug)]
pub struct Debouncer {
    window_ms: i64,
    last_blocked: Option<(AppId, i64)>,
}

impl Debouncer {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
            last_blocked: None,
        }
    }

    /// Record a violation of `app` at `now_ms`; returns `false` if it falls
    /// inside the window of the previous trigger for the same app.
    pub fn should_trigger(&mut self, app: &AppId, now_ms: i64) -> bool {
        if let Some((last_app, last_at)) = &self.last_blocked {
            if last_app == app && now_ms.saturating_sub(*last_at) < self.window_ms {
                return false;
            }
        }
        self.last_blocked = Some((app.clone(), now_ms));
        true
    }
}
