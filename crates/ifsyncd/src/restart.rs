//! Service Restart Trigger
//!
//! Changes written to the persistent store only reach the kernel when the
//! network service rereads them. The restart runs in a detached shell
//! process that sleeps for the delay and then execs the service command,
//! so it still happens if the daemon exits in the meantime. The caller
//! never waits for it.

use ifsync_common::{shell, IfsyncResult};
use std::time::Duration;
use tracing::{info, warn};

use crate::tables::{NETWORK_INIT_SCRIPT, RESTART_ARG};

/// Schedules a network service restart.
#[cfg_attr(test, mockall::automock)]
pub trait RestartScheduler: Send + Sync {
    /// Arrange for the restart to run after `delay`. Returns immediately.
    fn schedule_restart(&self, delay: Duration);
}

/// Restarts the network service with `<command> restart`.
#[derive(Debug, Clone)]
pub struct ServiceRestarter {
    command: String,
}

impl Default for ServiceRestarter {
    fn default() -> Self {
        Self::new(NETWORK_INIT_SCRIPT)
    }
}

impl ServiceRestarter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Full command line run once the delay has elapsed.
    pub fn restart_command(&self) -> String {
        format!("{} {}", self.command, RESTART_ARG)
    }

    /// Shell script run by the detached worker.
    pub fn worker_script(&self, delay: Duration) -> String {
        format!(
            "sleep {}.{:03}; exec {}",
            delay.as_secs(),
            delay.subsec_millis(),
            self.restart_command()
        )
    }

    /// Start the detached worker. Returns its pid.
    pub fn spawn_restart(&self, delay: Duration) -> IfsyncResult<Option<u32>> {
        let script = self.worker_script(delay);
        info!(
            command = %self.restart_command(),
            delay_ms = delay.as_millis() as u64,
            "Scheduling network restart"
        );
        shell::spawn_detached(&script)
    }
}

impl RestartScheduler for ServiceRestarter {
    fn schedule_restart(&self, delay: Duration) {
        if let Err(e) = self.spawn_restart(delay) {
            warn!(error = %e, "Network restart not scheduled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Instant;
    use tempfile::TempDir;

    /// Restart command that writes its argument to `out`.
    fn recording_command(out: &Path) -> String {
        format!(
            "/bin/sh -c 'echo \"$1\" > {}' init",
            shell::shellquote(&out.display().to_string())
        )
    }

    fn wait_for(path: &Path, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(text) = std::fs::read_to_string(path) {
                if !text.is_empty() {
                    return Some(text);
                }
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        None
    }

    #[test]
    fn test_restart_command() {
        assert_eq!(
            ServiceRestarter::default().restart_command(),
            "/etc/init.d/network restart"
        );
    }

    #[test]
    fn test_worker_script() {
        let restarter = ServiceRestarter::default();
        assert_eq!(
            restarter.worker_script(Duration::from_secs(5)),
            "sleep 5.000; exec /etc/init.d/network restart"
        );
        assert_eq!(
            restarter.worker_script(Duration::from_millis(250)),
            "sleep 0.250; exec /etc/init.d/network restart"
        );
    }

    #[test]
    fn test_no_runtime() {
        let restarter = ServiceRestarter::new("true");
        assert!(restarter.spawn_restart(Duration::ZERO).is_err());
        restarter.schedule_restart(Duration::ZERO);
    }

    #[tokio::test]
    async fn test_restart_runs_after_delay() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("restarted");
        let restarter = ServiceRestarter::new(recording_command(&out));

        let pid = restarter.spawn_restart(Duration::from_millis(10)).unwrap();
        assert!(pid.is_some());

        let written = wait_for(&out, Duration::from_secs(5)).unwrap();
        assert_eq!(written.trim(), "restart");
    }

    #[test]
    fn test_restart_survives_runtime_shutdown() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("restarted");
        let restarter = ServiceRestarter::new(recording_command(&out));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async { restarter.schedule_restart(Duration::from_millis(200)) });
        drop(runtime);

        let written = wait_for(&out, Duration::from_secs(5)).unwrap();
        assert_eq!(written.trim(), "restart");
    }

    #[test]
    fn test_mock_scheduler() {
        let mut mock = MockRestartScheduler::new();
        mock.expect_schedule_restart()
            .withf(|d| *d == Duration::from_secs(5))
            .times(1)
            .return_const(());

        mock.schedule_restart(Duration::from_secs(5));
    }
}
