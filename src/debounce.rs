//! Cancellable delayed task.
//!
//! [`Debouncer::schedule`] aborts whatever timer is pending, then starts a
//! new one. When the timer elapses the task is spawned on its own, so
//! aborting a later timer never cancels a task that has already started.
//!
//! Must be used from within a tokio runtime.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct Debouncer {
    delay: Duration,
    maybe_handle: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            maybe_handle: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `task` after the delay unless rescheduled or cancelled first.
    pub fn schedule<F, Fut>(&mut self, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let delay = self.delay;
        self.maybe_handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(task());
        }));
    }

    /// Drop the pending timer, if any. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.maybe_handle.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.maybe_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
