use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use monkgate_storage::AppId;
use tokio::process::Command;

use super::{first_line, FocusEvent, FocusRedirector, PermissionDenied, UsageSource};

// Requires the Automation permission for System Events
const FRONTMOST_SCRIPT: &str = r#"
    tell application "System Events"
        return bundle identifier of first application process whose frontmost is true
    end tell
"#;

// "Not authorized to send Apple events" and "assistive access not allowed"
const DENIED_MARKERS: [&str; 3] = ["-1743", "-1719", "not allowed"];

fn is_permission_refusal(stderr: &str) -> bool {
    DENIED_MARKERS.iter().any(|marker| stderr.contains(marker))
}

pub struct MacOSPlatform;

impl MacOSPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn run_script(script: &str) -> Result<std::process::Output> {
        Command::new("osascript")
            .arg("-e")
            .arg(script)
            .output()
            .await
            .context("Failed to run osascript")
    }

    async fn frontmost_bundle_id() -> Result<Option<String>> {
        let output = Self::run_script(FRONTMOST_SCRIPT).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_permission_refusal(&stderr) {
                log::debug!("Foreground query refused: {}", stderr.trim());
                return Err(PermissionDenied.into());
            }
            bail!("osascript exited with {}: {}", output.status, stderr.trim());
        }
        Ok(first_line(&output.stdout))
    }
}

impl Default for MacOSPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageSource for MacOSPlatform {
    async fn has_usage_permission(&self) -> bool {
        match Self::frontmost_bundle_id().await {
            Ok(_) => true,
            Err(e) => {
                log::debug!("Foreground query not permitted: {e:#}");
                false
            }
        }
    }

    async fn focus_events(&self, _since_ms: i64, until_ms: i64) -> Result<Vec<FocusEvent>> {
        let Some(bundle_id) = Self::frontmost_bundle_id().await? else {
            return Ok(Vec::new());
        };
        match AppId::parse(&bundle_id) {
            Ok(app_id) => Ok(vec![FocusEvent {
                app_id,
                at_ms: until_ms,
            }]),
            Err(e) => {
                log::debug!("Skipping frontmost app {bundle_id:?}: {e}");
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl FocusRedirector for MacOSPlatform {
    async fn has_redirect_permission(&self) -> bool {
        // Activation goes through the same Automation grant as the usage query
        self.has_usage_permission().await
    }

    async fn bring_to_front(&self, app: &AppId) -> Result<()> {
        // AppId is restricted to [A-Za-z0-9_.-], safe inside a quoted literal
        let script = format!(r#"tell application id "{app}" to activate"#);
        let output = Self::run_script(&script).await?;
        if !output.status.success() {
            bail!(
                "activate {app} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
