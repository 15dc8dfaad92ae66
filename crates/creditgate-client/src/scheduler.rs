//! Cancelable delayed tasks on tokio time.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

/// A task that runs after a delay unless canceled first.
///
/// Only the delay is cancelable. Once it elapses the task is detached and
/// runs to completion even if the handle is canceled or dropped. Dropping
/// the handle before then cancels the task.
#[derive(Debug)]
pub struct ScheduledTask {
    timer: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `task` after `delay`.
    pub fn after<F>(delay: Duration, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(task);
        });
        Self { timer }
    }

    /// Cancel the task if its delay has not elapsed.
    pub fn cancel(&self) {
        self.timer.abort();
    }

    /// Whether the delay has elapsed (the task was started) or the task was
    /// canceled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.timer.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Collapses bursts of triggers into one run after a quiet period.
///
/// Each trigger replaces the pending run, so the task runs once, `delay`
/// after the last trigger of a burst. A run that already started is not
/// interrupted by later triggers.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<ScheduledTask>>,
}

impl Debouncer {
    /// Create a debouncer with the given quiet period.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Schedule `task`, replacing any pending run.
    pub fn trigger<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let next = ScheduledTask::after(self.delay, task);
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(next);
        drop(previous);
    }

    /// Cancel the pending run, if it has not started.
    pub fn cancel(&self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Whether a run is scheduled and has not started.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}
