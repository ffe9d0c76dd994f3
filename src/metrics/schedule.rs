//! Repeating tick schedule with typed cancellation
//!
//! Each `start` opens a new generation. Ticks receive a [`TickGuard`] for the
//! generation that spawned them and must check it before publishing results:
//! once `cancel` returns, every guard handed out earlier reports stale.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

/// Proof that a tick belongs to a particular schedule run
#[derive(Debug, Clone)]
pub struct TickGuard {
    generation: u64,
    current: Arc<AtomicU64>,
}

impl TickGuard {
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }
}

struct Running {
    period: Duration,
    task: JoinHandle<()>,
}

/// A single repeating timer; at most one run is active at a time
pub struct RepeatingSchedule {
    generation: Arc<AtomicU64>,
    running: Mutex<Option<Running>>,
}

impl Default for RepeatingSchedule {
    fn default() -> Self {
        Self::new()
    }
}

impl RepeatingSchedule {
    pub fn new() -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn period(&self) -> Option<Duration> {
        self.running.lock().as_ref().map(|r| r.period)
    }

    /// Spawn the tick loop; the first tick fires immediately
    ///
    /// Returns `false` without side effects when already running. Must be called
    /// from within a tokio runtime.
    pub fn start<F, Fut>(&self, period: Duration, tick: F) -> bool
    where
        F: Fn(TickGuard) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock();
        if running.is_some() {
            return false;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = TickGuard {
            generation,
            current: self.generation.clone(),
        };

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Starting telemetry schedule with interval: {:?}", period);

            loop {
                ticker.tick().await;
                if !guard.is_current() {
                    break;
                }
                tick(guard.clone()).await;
            }
            debug!("Telemetry schedule generation {} ended", guard.generation);
        });

        *running = Some(Running { period, task });
        true
    }

    /// Stop the tick loop; safe when not running
    ///
    /// Returns whether a running schedule was cancelled.
    pub fn cancel(&self) -> bool {
        let mut running = self.running.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        match running.take() {
            Some(run) => {
                run.task.abort();
                debug!("Telemetry schedule cancelled");
                true
            }
            None => false,
        }
    }
}

impl Drop for RepeatingSchedule {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(schedule: &RepeatingSchedule, period: Duration) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        schedule.start(period, move |_guard| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        count
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_immediate() {
        let schedule = RepeatingSchedule::new();
        let count = counting(&schedule, Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(schedule.period(), Some(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent_while_running() {
        let schedule = RepeatingSchedule::new();
        let count = counting(&schedule, Duration::from_secs(1));
        assert!(!schedule.start(Duration::from_millis(10), |_| async {}));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks_and_invalidates_guards() {
        let schedule = RepeatingSchedule::new();
        let guards = Arc::new(Mutex::new(Vec::new()));
        let g = guards.clone();
        schedule.start(Duration::from_secs(1), move |guard| {
            g.lock().push(guard);
            async {}
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(schedule.cancel());
        assert!(!schedule.is_running());
        assert!(!schedule.cancel());

        tokio::time::sleep(Duration::from_secs(5)).await;
        let guards = guards.lock();
        assert_eq!(guards.len(), 1);
        assert!(!guards[0].is_current());
    }

    #[test]
    fn test_cancel_without_start() {
        let schedule = RepeatingSchedule::new();
        assert!(!schedule.cancel());
        assert_eq!(schedule.period(), None);
    }
}
