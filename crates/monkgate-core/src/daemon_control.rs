use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const PID_FILE: &str = "monkgate.pid";
const SOCK_FILE: &str = "monkgate.sock";
const LOG_FILE: &str = "monkgate.log";

/// Locates the daemon's PID file, socket and log inside the data directory
#[derive(Debug, Clone)]
pub struct DaemonControl {
    data_dir: PathBuf,
}

impl DaemonControl {
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
        }
    }

    #[must_use]
    pub fn pid_path(&self) -> PathBuf {
        self.data_dir.join(PID_FILE)
    }

    #[must_use]
    pub fn sock_path(&self) -> PathBuf {
        self.data_dir.join(SOCK_FILE)
    }

    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE)
    }

    /// # Errors
    ///
    /// Returns an error if the PID file cannot be written
    pub fn write_pid(&self, pid: u32) -> Result<()> {
        std::fs::write(self.pid_path(), pid.to_string()).context("Failed to write PID file")
    }

    /// Get PID of running daemon
    ///
    /// # Errors
    ///
    /// Returns an error if the PID file exists but is unreadable or malformed
    pub fn get_pid(&self) -> Result<Option<u32>> {
        let path = self.pid_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let pid = contents
            .trim()
            .parse::<u32>()
            .with_context(|| format!("Malformed PID file: {}", path.display()))?;
        Ok(Some(pid))
    }

    /// Remove PID file and socket
    ///
    /// # Errors
    ///
    /// Returns an error if either file exists and cannot be removed
    pub fn cleanup(&self) -> Result<()> {
        for path in [self.pid_path(), self.sock_path()] {
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_round_trip_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let control = DaemonControl::new(dir.path());

        assert_eq!(control.get_pid().unwrap(), None);
        control.write_pid(4242).unwrap();
        assert_eq!(control.get_pid().unwrap(), Some(4242));

        std::fs::write(control.sock_path(), b"").unwrap();
        control.cleanup().unwrap();
        assert!(!control.pid_path().exists());
        assert!(!control.sock_path().exists());
        // Nothing left to remove
        control.cleanup().unwrap();
    }

    #[test]
    fn test_malformed_pid_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let control = DaemonControl::new(dir.path());
        std::fs::write(control.pid_path(), "not-a-pid").unwrap();
        assert!(control.get_pid().is_err());
    }

    #[test]
    fn test_paths_live_in_data_dir() {
        let control = DaemonControl::new(Path::new("/var/lib/monkgate"));
        assert_eq!(
            control.sock_path(),
            PathBuf::from("/var/lib/monkgate/monkgate.sock")
        );
        assert_eq!(
            control.log_path(),
            PathBuf::from("/var/lib/monkgate/monkgate.log")
        );
    }
}
