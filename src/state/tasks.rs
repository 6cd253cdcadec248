//! Registry of fire-and-forget background work (remote sync triggers,
//! completion checks). Failures are logged and kept in a bounded history.

use std::{
    collections::VecDeque,
    fmt::Display,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use uuid::Uuid;

/// A background task that returned an error.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    /// Id returned by [`TaskRegistry::spawn`].
    pub id: Uuid,
    /// Name the task was spawned under.
    pub name: &'static str,
    /// Rendered error.
    pub message: String,
    /// When the failure was recorded.
    pub failed_at: OffsetDateTime,
}

/// Spawns tracked background tasks and records their failures.
#[derive(Clone)]
pub struct TaskRegistry {
    tracker: TaskTracker,
    pending: Arc<Pending>,
    failures: Arc<Mutex<VecDeque<TaskFailure>>>,
    failure_count: Arc<AtomicUsize>,
    history: usize,
}

/// Count of unfinished tasks, with a wakeup when it drops to zero.
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements [`Pending`] when the task ends, panics included.
struct PendingGuard(Arc<Pending>);

impl PendingGuard {
    fn new(pending: Arc<Pending>) -> Self {
        pending.count.fetch_add(1, Ordering::SeqCst);
        Self(pending)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl TaskRegistry {
    /// Create a registry keeping at most `history` failures.
    pub fn new(history: usize) -> Self {
        Self {
            tracker: TaskTracker::new(),
            pending: Arc::new(Pending::default()),
            failures: Arc::new(Mutex::new(VecDeque::with_capacity(history))),
            failure_count: Arc::new(AtomicUsize::new(0)),
            history,
        }
    }

    /// Run `work` in the background. Errors are logged, never propagated.
    pub fn spawn<F, E>(&self, name: &'static str, work: F) -> Uuid
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let id = Uuid::new_v4();
        let failures = self.failures.clone();
        let failure_count = self.failure_count.clone();
        let history = self.history;
        let pending = PendingGuard::new(self.pending.clone());

        self.tracker.spawn(async move {
            let _pending = pending;
            debug!(task = name, task_id = %id, "background task started");
            if let Err(err) = work.await {
                warn!(task = name, task_id = %id, error = %err, "background task failed");
                failure_count.fetch_add(1, Ordering::Relaxed);

                if history > 0 {
                    let mut guard = failures.lock().await;
                    if guard.len() == history {
                        guard.pop_front();
                    }
                    guard.push_back(TaskFailure {
                        id,
                        name,
                        message: err.to_string(),
                        failed_at: OffsetDateTime::now_utc(),
                    });
                }
            }
        });

        id
    }

    /// Wait until no task is running, including tasks spawned while waiting.
    ///
    /// Any number of callers may wait at once; the registry stays open.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.pending.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting tracked work and wait for the running tasks. Used once,
    /// on process shutdown.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Number of tasks still running.
    pub fn in_flight(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Total number of failed tasks since startup.
    pub fn failure_count(&self) -> usize {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Most recent failures, oldest first.
    pub async fn recent_failures(&self) -> Vec<TaskFailure> {
        self.failures.lock().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    #[tokio::test]
    async fn wait_idle_waits_for_spawned_work() {
        let registry = TaskRegistry::new(4);
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();

        registry.spawn("sleepy", async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<(), std::convert::Infallible>(())
        });

        registry.wait_idle().await;
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(registry.in_flight(), 0);
    }

    #[tokio::test]
    async fn failures_are_counted_and_bounded() {
        let registry = TaskRegistry::new(2);
        for index in 0..3 {
            registry.spawn("failing", async move { Err(format!("failure {index}")) });
            registry.wait_idle().await;
        }

        assert_eq!(registry.failure_count(), 3);
        let recent = registry.recent_failures().await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "failure 1");
        assert_eq!(recent[1].message, "failure 2");
    }

    #[tokio::test]
    async fn overlapping_waiters_all_return() {
        let registry = TaskRegistry::new(1);
        registry.spawn("slow", async {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            Ok::<(), std::convert::Infallible>(())
        });
        registry.spawn("fast", async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            Ok::<(), std::convert::Infallible>(())
        });

        let first = registry.clone();
        let second = registry.clone();
        let waiters = async {
            tokio::join!(first.wait_idle(), second.wait_idle());
        };
        tokio::time::timeout(std::time::Duration::from_secs(2), waiters)
            .await
            .expect("both waiters return once the tasks finish");
        assert_eq!(registry.in_flight(), 0);
    }

    #[tokio::test]
    async fn shutdown_waits_for_running_work() {
        let registry = TaskRegistry::new(1);
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        registry.spawn("draining", async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<(), std::convert::Infallible>(())
        });

        registry.shutdown().await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn registry_keeps_accepting_work_after_waiting() {
        let registry = TaskRegistry::new(1);
        registry.wait_idle().await;
        registry.spawn("late", async { Err("late failure") });
        registry.wait_idle().await;
        assert_eq!(registry.failure_count(), 1);
    }
}
