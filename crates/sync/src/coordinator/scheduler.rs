//! Deferred callbacks for pass retries.

use std::time::Duration;

use tokio::task::AbortHandle;

/// Runs a callback once after a delay.
///
/// Callbacks must be cheap and must not block; the coordinator only uses
/// them to post a message to its driver.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerHandle;
}

/// Handle to a scheduled callback.
#[derive(Debug, Default)]
pub struct TimerHandle(Option<AbortHandle>);

impl TimerHandle {
    /// A handle that cancels nothing.
    pub fn detached() -> Self {
        Self(None)
    }

    /// Prevent the callback from running if it has not fired yet.
    pub fn cancel(self) {
        if let Some(handle) = self.0 {
            handle.abort();
        }
    }
}

/// Scheduler backed by `tokio::time::sleep` on the current runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        TimerHandle(Some(task.abort_handle()))
    }
}
