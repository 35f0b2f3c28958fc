//! Cancellable background tasks.
//!
//! Each service owns a [`TaskSet`]. Tasks hold only a [`Weak`] reference to
//! their service so a dropped service is never kept alive by its own timers,
//! and [`TaskSet::stop`] aborts everything so no stale timer can write to
//! storage after teardown.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct TaskSet {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `tick` once after `first_delay`, then every `period`, until the
    /// target is dropped or the set is stopped.
    pub fn spawn_periodic<T, F, Fut>(
        &mut self,
        name: &'static str,
        target: Weak<T>,
        first_delay: Duration,
        period: Duration,
        tick: F,
    ) where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(first_delay).await;
            loop {
                let Some(target) = target.upgrade() else {
                    tracing::debug!(task = name, "Owner dropped, stopping task");
                    break;
                };
                run_guarded(name, tick(target)).await;
                tokio::time::sleep(period).await;
            }
        });

        self.handles.push((name, handle));
    }

    /// Run a long-lived future, e.g. an observer loop, until it returns or
    /// the set is stopped.
    pub fn spawn<Fut>(&mut self, name: &'static str, fut: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(run_guarded(name, fut));
        self.handles.push((name, handle));
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.handles
            .iter()
            .any(|(n, h)| *n == name && !h.is_finished())
    }

    pub fn len(&self) -> usize {
        self.handles.iter().filter(|(_, h)| !h.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort every task.
    pub fn stop(&mut self) {
        for (name, handle) in self.handles.drain(..) {
            handle.abort();
            tracing::debug!(task = name, "Task cancelled");
        }
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Panics in a tick are logged rather than silently killing the task.
async fn run_guarded<Fut>(name: &'static str, fut: Fut)
where
    Fut: Future<Output = ()> + Send,
{
    if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
        let panic_msg = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!("Task '{}' panicked: {}", name, panic_msg);
    }
}
