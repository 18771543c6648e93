use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use monkgate_storage::AppId;
use tokio::process::Command;

use super::{first_line, FocusEvent, FocusRedirector, PermissionDenied, UsageSource};

/// X11 backend driven through `xdotool`. Application identity is the
/// window class of the active window.
pub struct LinuxPlatform {
    xdotool: String,
}

impl LinuxPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self {
            xdotool: String::from("xdotool"),
        }
    }

    fn has_display() -> bool {
        std::env::var_os("DISPLAY").is_some_and(|d| !d.is_empty())
    }

    async fn xdotool(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new(&self.xdotool)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.xdotool))
    }
}

fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<std::io::Error>()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound)
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageSource for LinuxPlatform {
    async fn has_usage_permission(&self) -> bool {
        if !Self::has_display() {
            return false;
        }
        match self.xdotool(&["version"]).await {
            Ok(output) => output.status.success(),
            Err(e) => {
                log::debug!("xdotool unavailable: {e:#}");
                false
            }
        }
    }

    async fn focus_events(&self, _since_ms: i64, until_ms: i64) -> Result<Vec<FocusEvent>> {
        if !Self::has_display() {
            return Err(PermissionDenied.into());
        }
        let output = match self
            .xdotool(&["getactivewindow", "getwindowclassname"])
            .await
        {
            Ok(output) => output,
            Err(e) if is_not_found(&e) => return Err(PermissionDenied.into()),
            Err(e) => return Err(e),
        };
        if !output.status.success() {
            // No active window (e.g. desktop focused) is not an error
            if output.stderr.is_empty() {
                return Ok(Vec::new());
            }
            bail!(
                "xdotool exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let Some(class) = first_line(&output.stdout) else {
            return Ok(Vec::new());
        };
        match AppId::parse(&class) {
            Ok(app_id) => Ok(vec![FocusEvent {
                app_id,
                at_ms: until_ms,
            }]),
            Err(e) => {
                log::debug!("Skipping window class {class:?}: {e}");
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl FocusRedirector for LinuxPlatform {
    async fn has_redirect_permission(&self) -> bool {
        self.has_usage_permission().await
    }

    async fn bring_to_front(&self, app: &AppId) -> Result<()> {
        let output = self
            .xdotool(&["search", "--limit", "1", "--class", app.as_str(), "windowactivate"])
            .await?;
        if !output.status.success() {
            bail!("no window with class {app} to activate");
        }
        Ok(())
    }
}
