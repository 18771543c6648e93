use monkgate_storage::AppId;
use std::{sync::Arc, time::Duration};

use crate::{
    clock::Clock,
    error::GateError,
    platform::{PermissionDenied, UsageSource},
};

/// Recognizes the host application in foreground results
#[derive(Debug, Clone)]
pub struct HostFilter {
    host: AppId,
}

impl HostFilter {
    #[must_use]
    pub fn new(host: AppId) -> Self {
        Self { host }
    }

    #[must_use]
    pub fn host(&self) -> &AppId {
        &self.host
    }

    #[must_use]
    pub fn is_host(&self, app: &AppId) -> bool {
        *app == self.host
    }
}

/// Application found in focus during one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundSample {
    pub app_id: AppId,
    /// Epoch milliseconds
    pub sampled_at: i64,
}

/// Finds the most recently focused application within a lookback window
pub struct ForegroundDetector {
    source: Arc<dyn UsageSource>,
    filter: HostFilter,
    clock: Arc<dyn Clock>,
    lookback: Duration,
}

impl ForegroundDetector {
    #[must_use]
    pub fn new(
        source: Arc<dyn UsageSource>,
        filter: HostFilter,
        clock: Arc<dyn Clock>,
        lookback: Duration,
    ) -> Self {
        Self {
            source,
            filter,
            clock,
            lookback,
        }
    }

    #[must_use]
    pub fn filter(&self) -> &HostFilter {
        &self.filter
    }

    pub async fn has_permission(&self) -> bool {
        self.source.has_usage_permission().await
    }

    /// Sample the foreground application with a single platform query.
    ///
    /// Returns `Ok(None)` when the platform refuses the query, nothing was
    /// focused in the window, or the host itself holds focus.
    ///
    /// # Errors
    ///
    /// Returns `DetectionTransientFailure` if the platform query fails
    pub async fn detect(&self) -> Result<Option<ForegroundSample>, GateError> {
        let now = self.clock.now_ms();
        let lookback_ms = i64::try_from(self.lookback.as_millis()).unwrap_or(i64::MAX);
        let since = now.saturating_sub(lookback_ms);

        let events = match self.source.focus_events(since, now).await {
            Ok(events) => events,
            Err(e) if e.downcast_ref::<PermissionDenied>().is_some() => {
                log::debug!("Foreground permission unavailable, no sample");
                return Ok(None);
            }
            Err(e) => return Err(GateError::DetectionTransientFailure(format!("{e:#}"))),
        };

        // Latest event wins; ties go to the one reported last
        let Some(latest) = events
            .into_iter()
            .filter(|e| e.at_ms >= since && e.at_ms <= now)
            .max_by_key(|e| e.at_ms)
        else {
            return Ok(None);
        };

        // Once the host has focus, older events in the window are stale
        if self.filter.is_host(&latest.app_id) {
            return Ok(None);
        }

        Ok(Some(ForegroundSample {
            app_id: latest.app_id,
            sampled_at: now,
        }))
    }
}
