//! Trailing-edge debouncer.
//!
//! Each trigger restarts a quiet-period timer; only the action of the last
//! trigger in a burst runs, once the interval passes without new triggers.
//! An action that has already started runs to completion on its own task and
//! is never interrupted by later triggers.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct Pending {
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

/// Debounces actions for one key (one group).
///
/// Must be used from within a Tokio runtime.
#[derive(Debug)]
pub struct Debouncer {
    interval: Duration,
    state: Arc<Mutex<Pending>>,
}

fn lock(state: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Arc::new(Mutex::new(Pending::default())),
        }
    }

    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Schedule `action`, replacing any action still waiting out its interval.
    pub fn trigger<F>(&self, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut pending = lock(&self.state);
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
        pending.generation = pending.generation.wrapping_add(1);
        let generation = pending.generation;

        let state = Arc::clone(&self.state);
        let interval = self.interval;
        pending.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            {
                let mut pending = lock(&state);
                // A newer trigger got in between the timer firing and this lock.
                if pending.generation != generation {
                    return;
                }
                // Detach: from here on the action can no longer be aborted.
                pending.timer = None;
            }
            action.await;
        }));
    }

    /// Whether an action is waiting for its interval to elapse.
    pub fn is_pending(&self) -> bool {
        lock(&self.state).timer.is_some()
    }

    /// Drop the waiting action, if any. Returns whether one was dropped.
    pub fn cancel(&self) -> bool {
        let mut pending = lock(&self.state);
        pending.generation = pending.generation.wrapping_add(1);
        match pending.timer.take() {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    type Log = Arc<Mutex<Vec<usize>>>;

    fn push(log: &Log, value: usize) -> impl Future<Output = ()> + Send + 'static {
        let log = Arc::clone(log);
        async move {
            log.lock().unwrap().push(value);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_runs_only_last_action() {
        let debouncer = Debouncer::new(Duration::from_secs(4));
        let log: Log = Arc::default();

        for i in 0..5 {
            debouncer.trigger(push(&log, i));
            sleep(Duration::from_secs(1)).await;
        }
        assert!(log.lock().unwrap().is_empty());
        assert!(debouncer.is_pending());

        sleep(Duration::from_secs(5)).await;
        assert_eq!(*log.lock().unwrap(), vec![4]);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_interval_of_quiet() {
        let debouncer = Debouncer::new(Duration::from_secs(4));
        let log: Log = Arc::default();

        debouncer.trigger(push(&log, 1));
        sleep(Duration::from_millis(3900)).await;
        assert!(log.lock().unwrap().is_empty());

        sleep(Duration::from_millis(200)).await;
        assert_eq!(*log.lock().unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_each_fire() {
        let debouncer = Debouncer::new(Duration::from_secs(4));
        let log: Log = Arc::default();

        debouncer.trigger(push(&log, 1));
        sleep(Duration::from_secs(5)).await;
        debouncer.trigger(push(&log, 2));
        sleep(Duration::from_secs(5)).await;

        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn running_action_is_not_interrupted() {
        let debouncer = Debouncer::new(Duration::from_secs(4));
        let finished = Arc::new(AtomicUsize::new(0));

        let slow = {
            let finished = Arc::clone(&finished);
            async move {
                sleep(Duration::from_secs(10)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            }
        };
        debouncer.trigger(slow);

        // The slow action is now running.
        sleep(Duration::from_secs(5)).await;
        let quick = {
            let finished = Arc::clone(&finished);
            async move {
                finished.fetch_add(10, Ordering::SeqCst);
            }
        };
        debouncer.trigger(quick);

        sleep(Duration::from_secs(20)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_waiting_action() {
        let debouncer = Debouncer::new(Duration::from_secs(4));
        let log: Log = Arc::default();

        debouncer.trigger(push(&log, 1));
        assert!(debouncer.cancel());
        assert!(!debouncer.cancel());

        sleep(Duration::from_secs(10)).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_triggers_fire_once() {
        const TASKS: usize = 8;
        const ROUNDS: usize = 50;

        let debouncer = Arc::new(Debouncer::new(Duration::from_millis(200)));
        let log: Log = Arc::default();
        let start = Arc::new(tokio::sync::Barrier::new(TASKS));

        let mut tasks = Vec::new();
        for task in 0..TASKS {
            let debouncer = Arc::clone(&debouncer);
            let log = Arc::clone(&log);
            let start = Arc::clone(&start);
            tasks.push(tokio::spawn(async move {
                start.wait().await;
                for round in 0..ROUNDS {
                    debouncer.trigger(push(&log, task * 100 + round));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        sleep(Duration::from_millis(800)).await;
        let log = log.lock().unwrap().clone();
        assert_eq!(log.len(), 1, "ran {log:?}");
        // The last trigger overall is some task's final round.
        assert_eq!(log[0] % 100, ROUNDS - 1);
        assert!(!debouncer.is_pending());
    }
}
