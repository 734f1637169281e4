//! Periodic tick driver shared by all schedulers
//!
//! A [`PeriodicTrigger`] runs a tick immediately on start and then once per
//! interval on a spawned tokio task:
//!
//! ```text
//! start() ──► tick ──► wait interval ──► tick ──► ... ──► stop signal seen ──► exit
//!                 └── stop() during a tick: the tick finishes, no further ticks
//! ```
//!
//! The loop awaits each tick before waiting for the next one, so ticks of one
//! trigger never overlap. [`TickGuard`] protects a cycle method against a
//! concurrent manual invocation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// ============================================================================
// Periodic Trigger
// ============================================================================

struct RunningTrigger {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Fixed-interval driver with idempotent start and stop
pub struct PeriodicTrigger {
    name: String,
    interval: Duration,
    running: Mutex<Option<RunningTrigger>>,
}

impl PeriodicTrigger {
    /// Create a stopped trigger
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the tick loop; returns `false` if it is already running
    pub fn start<F, Fut>(&self, tick: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(running.as_ref(), Some(r) if !r.handle.is_finished()) {
            tracing::debug!(trigger = %self.name, "Trigger already running");
            return false;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let interval = self.interval;
        let name = self.name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        tick().await;
                    }
                }
            }

            tracing::debug!(trigger = %name, "Trigger loop exited");
        });

        tracing::info!(
            trigger = %self.name,
            interval_ms = self.interval.as_millis() as u64,
            "Trigger started"
        );
        *running = Some(RunningTrigger { stop_tx, handle });
        true
    }

    /// Prevent future ticks; an in-flight tick runs to completion
    ///
    /// Returns `false` if the trigger was not running.
    pub fn stop(&self) -> bool {
        let taken = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        match taken {
            Some(running) => {
                let _ = running.stop_tx.send(true);
                tracing::info!(trigger = %self.name, "Trigger stopped");
                true
            }
            None => false,
        }
    }

    /// Check if the tick loop is alive
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

impl Drop for PeriodicTrigger {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Tick Guard
// ============================================================================

/// RAII marker for "tick in progress"
pub struct TickGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> TickGuard<'a> {
    /// Acquire the flag, or `None` if a tick is already running
    pub fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
