// ABOUTME: Termination watchdog for active stacks
// ABOUTME: Cancellable timer that fires the expiry path at expires_at

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::orchestrator::OrchestratorInner;

/// Handle to a scheduled expiry task.
///
/// Cancellation aborts the timer; the race against a concurrently firing
/// timer is resolved by the expiry handler's phase re-check under the
/// per-stack lock, so an abort that lands too late is harmless.
pub(crate) struct WatchdogHandle {
    task: JoinHandle<()>,
}

impl WatchdogHandle {
    pub(crate) fn cancel(self) {
        self.task.abort();
    }
}

/// Schedule the expiry of `stack_id` at `expires_at`
pub(crate) fn arm(
    inner: Arc<OrchestratorInner>,
    stack_id: String,
    expires_at: DateTime<Utc>,
) -> WatchdogHandle {
    let task = tokio::spawn(async move {
        let delay = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(delay).await;
        inner.handle_expiry(&stack_id).await;
    });

    WatchdogHandle { task }
}
