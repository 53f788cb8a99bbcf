//! Cancellable periodic tasks.
//!
//! The coordinator runs several independently scheduled tasks (leader
//! heartbeat, follower staleness check, leader-discovery retransmission)
//! that must be re-armed under lock: arming a replacement first cancels the
//! stored handle so at most one task per purpose is ever live.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;

/// Handle to a spawned periodic task.
///
/// Dropping the handle does not stop the task; call [`TaskHandle::cancel`].
pub struct TaskHandle {
    cancel: Arc<Notify>,
}

impl TaskHandle {
    /// Stop the task. The current tick, if running, completes first.
    ///
    /// Stores a permit, so a cancel issued mid-tick (or before the task is
    /// first polled) still lands at the next await point.
    pub fn cancel(&self) {
        self.cancel.notify_one();
    }
}

/// Spawn a fixed-delay periodic task.
///
/// Fires `tick` once after `initial_delay`, then repeatedly with `period`
/// between the end of one tick and the start of the next, until cancelled.
pub fn spawn_periodic<F, Fut>(initial_delay: Duration, period: Duration, mut tick: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let cancel = Arc::new(Notify::new());
    let cancelled = cancel.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = sleep(initial_delay) => {}
            _ = cancelled.notified() => return,
        }
        loop {
            tick().await;
            tokio::select! {
                _ = sleep(period) => {}
                _ = cancelled.notified() => return,
            }
        }
    });

    TaskHandle { cancel }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_periodic_task_fires() {
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();

        let handle = spawn_periodic(Duration::ZERO, Duration::from_millis(10), move || {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(55)).await;
        handle.cancel();

        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 3, "expected at least 3 ticks, got {}", fired);
    }

    #[tokio::test]
    async fn test_cancel_before_initial_delay() {
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();

        let handle = spawn_periodic(Duration::from_secs(10), Duration::from_secs(10), move || {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        handle.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_tick_takes_effect() {
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();

        let handle = spawn_periodic(Duration::ZERO, Duration::from_millis(5), move || {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(40)).await;
            }
        });

        // Cancel while the first tick is still running; the signal must
        // survive until the tick finishes.
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            count.load(Ordering::SeqCst),
            1,
            "task kept ticking after a mid-tick cancel"
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_ticks() {
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();

        let handle = spawn_periodic(Duration::ZERO, Duration::from_millis(5), move || {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.cancel();
        let at_cancel = count.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let after = count.load(Ordering::SeqCst);
        assert!(after <= at_cancel + 1, "task kept ticking after cancel");
    }
}
