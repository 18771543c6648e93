use monkgate_storage::{AppId, Database, PendingBlockSignal};
use std::sync::Arc;

use crate::{clock::Clock, error::GateError, platform::FocusRedirector};

/// Hands a violation to the UI and pulls focus back to the host app
pub struct EnforcementAction {
    store: Arc<Database>,
    redirector: Arc<dyn FocusRedirector>,
    host_app: AppId,
    clock: Arc<dyn Clock>,
}

impl EnforcementAction {
    #[must_use]
    pub fn new(
        store: Arc<Database>,
        redirector: Arc<dyn FocusRedirector>,
        host_app: AppId,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            redirector,
            host_app,
            clock,
        }
    }

    /// Write the pending block signal, then redirect focus to the host.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the signal could not be written (no redirect is
    /// attempted) or `RedirectFailed` if focus could not be moved (the signal
    /// stays written).
    pub async fn trigger(&self, app: &AppId) -> Result<PendingBlockSignal, GateError> {
        let signal = self
            .store
            .write_pending_block(app, self.clock.now_ms())
            .map_err(|e| GateError::storage(&e))?;

        self.redirector
            .bring_to_front(&self.host_app)
            .await
            .map_err(|e| GateError::RedirectFailed(format!("{e:#}")))?;

        log::info!("Blocked {app}, focus returned to {}", self.host_app);
        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, platform::testing::RecordingRedirector};

    fn setup() -> (Arc<Database>, Arc<RecordingRedirector>, EnforcementAction) {
        let store = Arc::new(Database::open_in_memory().unwrap());
        let redirector = Arc::new(RecordingRedirector::new());
        let action = EnforcementAction::new(
            store.clone(),
            redirector.clone(),
            AppId::parse("com.monkmode.app").unwrap(),
            Arc::new(ManualClock::new(5_000)),
        );
        (store, redirector, action)
    }

    #[tokio::test]
    async fn test_trigger_writes_signal_and_redirects() {
        let (store, redirector, action) = setup();
        let app = AppId::parse("app.social").unwrap();

        let signal = action.trigger(&app).await.unwrap();

        assert_eq!(signal.blocked_app, app);
        assert_eq!(signal.set_at, 5_000);
        assert_eq!(store.peek_pending_block().unwrap(), Some(signal));
        assert_eq!(
            redirector.redirects.lock().unwrap().as_slice(),
            &[AppId::parse("com.monkmode.app").unwrap()]
        );
    }

    #[tokio::test]
    async fn test_repeated_trigger_is_harmless() {
        let (store, redirector, action) = setup();
        let app = AppId::parse("app.social").unwrap();

        action.trigger(&app).await.unwrap();
        let second = action.trigger(&app).await.unwrap();

        assert_eq!(redirector.count(), 2);
        assert_eq!(store.peek_pending_block().unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_redirect_failure_keeps_signal() {
        let (store, redirector, action) = setup();
        redirector.set_failing(true);
        let app = AppId::parse("app.social").unwrap();

        let result = action.trigger(&app).await;

        assert!(matches!(result, Err(GateError::RedirectFailed(_))));
        let pending = store.peek_pending_block().unwrap().unwrap();
        assert_eq!(pending.blocked_app, app);
    }
}
