//! Single-slot cancellable task holder.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Holds at most one pending task for one role (reconnect delay, session
/// loop, typing stop). Starting a task aborts the one already in the slot,
/// and dropping the slot aborts whatever is pending.
#[derive(Debug, Default)]
pub struct TimerSlot {
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fire` once after `delay`, replacing any pending task.
    pub fn schedule<F>(&mut self, delay: Duration, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
        }));
    }

    /// Run a long-lived task in this slot, replacing any pending task.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(task));
    }

    /// Abort the pending task. Returns true if one was still running.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    /// Let the task in the slot run to completion on its own. Used by a task
    /// that is finishing itself and must not abort itself.
    pub fn release(&mut self) {
        self.handle.take();
    }

    pub fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
