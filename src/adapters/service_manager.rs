//! Service manager boundary
//!
//! Liveness and restart of OS-level services. Every call is time-bounded; a
//! probe that times out reports the service as inactive.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, WardenError};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Whether the service is running; failures and timeouts count as inactive
    async fn is_active(&self, service: &str) -> bool;

    /// Restart the service; safe to call on a running service
    async fn restart(&self, service: &str) -> Result<()>;
}

/// systemd implementation driven through `systemctl`
pub struct SystemdServiceManager {
    systemctl: PathBuf,
    timeout: Duration,
}

impl SystemdServiceManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            systemctl: PathBuf::from("systemctl"),
            timeout,
        }
    }

    /// Use an alternative control binary with `systemctl`-compatible arguments
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.systemctl = binary.into();
        self
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.systemctl);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl ServiceManager for SystemdServiceManager {
    async fn is_active(&self, service: &str) -> bool {
        let mut command = self.command(&["is-active", "--quiet", service]);
        let probe = command.stderr(Stdio::null()).status();

        match tokio::time::timeout(self.timeout, probe).await {
            Ok(Ok(status)) => {
                debug!("Service {} is-active -> {}", service, status);
                status.success()
            }
            Ok(Err(e)) => {
                warn!("Service probe for {} failed: {}", service, e);
                false
            }
            Err(_) => {
                warn!(
                    "Service probe for {} timed out after {:?}, treating as inactive",
                    service, self.timeout
                );
                false
            }
        }
    }

    async fn restart(&self, service: &str) -> Result<()> {
        let restart = self.command(&["restart", service]).output();

        let output = tokio::time::timeout(self.timeout, restart)
            .await
            .map_err(|_| WardenError::timeout(format!("restart {}", service), self.timeout))??;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(WardenError::ServiceManager(format!(
                "restart {} exited with {}: {}",
                service,
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn script(body: &str) -> tempfile::TempPath {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "#!/bin/sh\n{}", body).unwrap();
        let path = file.into_temp_path();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_exit_status_maps_to_liveness() {
        let active = script("exit 0");
        let manager =
            SystemdServiceManager::new(Duration::from_secs(5)).with_binary(active.to_path_buf());
        assert!(manager.is_active("nginx").await);
        assert!(manager.restart("nginx").await.is_ok());

        let inactive = script("echo 'unit not found' >&2; exit 3");
        let manager =
            SystemdServiceManager::new(Duration::from_secs(5)).with_binary(inactive.to_path_buf());
        assert!(!manager.is_active("nginx").await);
        let err = manager.restart("nginx").await.unwrap_err();
        assert!(err.to_string().contains("unit not found"));
    }

    #[tokio::test]
    async fn test_timed_out_probe_is_inactive() {
        let slow = script("sleep 5");
        let manager =
            SystemdServiceManager::new(Duration::from_millis(100)).with_binary(slow.to_path_buf());

        let started = std::time::Instant::now();
        assert!(!manager.is_active("nginx").await);
        assert!(started.elapsed() < Duration::from_secs(2));

        assert!(matches!(
            manager.restart("nginx").await,
            Err(WardenError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_inactive() {
        let manager = SystemdServiceManager::new(Duration::from_secs(1))
            .with_binary("/nonexistent/systemctl");
        assert!(!manager.is_active("nginx").await);
        assert!(manager.restart("nginx").await.is_err());
    }
}
