//! Process signalling
//!
//! Managed children run in their own process group, so termination targets the
//! group first and falls back to the single PID.

use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::error::{Result, WardenError};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None::<Signal>) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn process_exists(_pid: u32) -> bool {
    false
}

/// Forced kill of a single process
#[cfg(unix)]
pub fn force_kill(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(WardenError::ProcessNotFound(format!("pid {}", pid))),
        Err(e) => Err(WardenError::Signal {
            pid,
            reason: e.to_string(),
        }),
    }
}

#[cfg(not(unix))]
pub fn force_kill(pid: u32) -> Result<()> {
    Err(WardenError::Signal {
        pid,
        reason: "signals not supported on this platform".to_string(),
    })
}

/// SIGTERM the process group, wait up to `grace`, then SIGKILL whatever is left.
/// Returns `true` when the forced kill was needed.
///
/// When the group was signalled, completion means every member is gone, not
/// only the leader: a grandchild that ignores SIGTERM still gets the SIGKILL.
#[cfg(unix)]
pub async fn terminate_gracefully(pid: u32, grace: Duration) -> Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let os_pid = Pid::from_raw(pid as i32);
    let pgid = Pid::from_raw(-(pid as i32));

    let mut delivered = false;
    match kill(pgid, Signal::SIGTERM) {
        Ok(()) => delivered = true,
        Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to send SIGTERM to process group of {}: {}", pid, e),
    }

    if !delivered {
        match kill(os_pid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return Ok(false),
            Err(e) => {
                return Err(WardenError::Signal {
                    pid,
                    reason: e.to_string(),
                })
            }
        }
    }

    let alive = || {
        if delivered {
            // Signal 0 to the group succeeds while any member remains
            !matches!(kill(pgid, None::<Signal>), Err(Errno::ESRCH))
        } else {
            process_exists(pid)
        }
    };

    let start = Instant::now();
    while start.elapsed() < grace {
        if !alive() {
            debug!("Process {} exited within grace period", pid);
            return Ok(false);
        }
        sleep(POLL_INTERVAL).await;
    }

    if !alive() {
        return Ok(false);
    }

    warn!(
        "Process {} (or its group) still alive after {:?}, sending SIGKILL",
        pid, grace
    );
    if delivered {
        let _ = kill(pgid, Signal::SIGKILL);
    }
    let _ = kill(os_pid, Signal::SIGKILL);
    Ok(true)
}

#[cfg(not(unix))]
pub async fn terminate_gracefully(pid: u32, _grace: Duration) -> Result<bool> {
    force_kill(pid).map(|_| true)
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_forced_kill_after_grace() {
        // Ignores SIGTERM, so only SIGKILL ends it
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; while true; do sleep 1; done"])
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let forced = terminate_gracefully(pid, Duration::from_millis(300))
            .await
            .unwrap();
        assert!(forced);

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_graceful_exit_needs_no_kill() {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        let waiter = tokio::spawn(async move { child.wait().await });
        let forced = terminate_gracefully(pid, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!forced);
        waiter.await.unwrap().unwrap();
    }

    /// Gone or a zombie waiting for whoever adopted it
    #[cfg(target_os = "linux")]
    fn is_dead(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => true,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_group_member_ignoring_sigterm_is_killed() {
        use tokio::io::{AsyncBufReadExt, BufReader};

        // The leader dies on SIGTERM; its background child ignores it
        let mut child = Command::new("sh")
            .args([
                "-c",
                "sh -c \"trap '' TERM; while true; do sleep 1; done\" & echo $!; wait",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        let mut lines = BufReader::new(child.stdout.take().unwrap()).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let grandchild: u32 = line.trim().parse().unwrap();
        let waiter = tokio::spawn(async move { child.wait().await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let forced = terminate_gracefully(pid, Duration::from_millis(400))
            .await
            .unwrap();
        assert!(forced);
        waiter.await.unwrap().unwrap();

        let mut dead = false;
        for _ in 0..50 {
            if is_dead(grandchild) {
                dead = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(dead, "pid {} outlived the forced kill", grandchild);
    }

    #[test]
    fn test_kill_missing_pid() {
        // Far above any pid_max the kernel allows
        assert!(matches!(
            force_kill(2_000_000_000),
            Err(WardenError::ProcessNotFound(_))
        ));
        assert!(!process_exists(2_000_000_000));
    }
}
