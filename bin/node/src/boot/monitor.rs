use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::warn;

/// How long a single startup step may run before the watchdog complains.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Watchdog for blocking startup steps. It warns when a step overruns the
/// timeout; the step itself is never cancelled.
pub struct StartMonitor {
    timeout: Duration,
}

impl StartMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn watch(&self, description: String) -> MonitorGuard {
        let timeout = self.timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!(
                "{description} did not finish within {}s",
                timeout.as_secs()
            );
        });
        MonitorGuard { handle }
    }
}

pub struct MonitorGuard {
    handle: JoinHandle<()>,
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
