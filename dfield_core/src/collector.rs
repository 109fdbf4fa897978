//! The blocking update map that gates step advancement.
//!
//! Listener threads `put` snapshots keyed by step and sender; the simulation
//! thread blocks in `await_step` until every expected sender has reported
//! for its current step, then takes the whole bucket.
//!
//! ```text
//! listener L --put(7, 0-0R)--+
//! listener U --put(7, 1-1D)--+--> buckets[7] = {0-0R, 1-1D}
//! listener R --put(8, 0-2L)--+    buckets[8] = {0-2L}
//!                                      |
//! sim thread  await_step(7, 2) <-------+  removes buckets[7]
//! ```
//!
//! One mutex guards all buckets and one condition variable signals every
//! mutation. Shutdown is a sticky flag: once `force_unblock` runs, every
//! current and future waiter gets [`StepUpdates::Aborted`].

use crate::error::SyncError;
use crate::snapshot::SenderKey;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of waiting for a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepUpdates<T> {
    /// Every expected sender reported; one entry per sender
    Complete(BTreeMap<SenderKey, T>),
    /// The collector was shut down; the caller must stop its step loop
    Aborted,
}

impl<T> StepUpdates<T> {
    pub fn is_aborted(&self) -> bool {
        matches!(self, StepUpdates::Aborted)
    }
}

#[derive(Debug)]
struct CollectorState<T> {
    buckets: HashMap<u64, BTreeMap<SenderKey, T>>,
    closed: bool,
    /// Every step below this one was handed to a consumer
    consumed_below: u64,
    /// Consumed steps at or above `consumed_below`
    consumed_gaps: BTreeSet<u64>,
}

impl<T> CollectorState<T> {
    fn is_consumed(&self, step: u64) -> bool {
        step < self.consumed_below || self.consumed_gaps.contains(&step)
    }

    fn mark_consumed(&mut self, step: u64) {
        if step < self.consumed_below {
            return;
        }
        self.consumed_gaps.insert(step);
        while self.consumed_gaps.remove(&self.consumed_below) {
            self.consumed_below += 1;
        }
    }
}

/// Per-step accumulator with a single consumer per step.
#[derive(Debug)]
pub struct PendingUpdateCollector<T> {
    state: Mutex<CollectorState<T>>,
    ready: Condvar,
    stall_warning: Option<Duration>,
}

impl<T> Default for PendingUpdateCollector<T> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<T> PendingUpdateCollector<T> {
    /// Creates an empty collector.
    ///
    /// With `stall_warning` set, a blocked `await_step` logs a warning each
    /// time that interval passes without the step completing.
    pub fn new(stall_warning: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(CollectorState {
                buckets: HashMap::new(),
                closed: false,
                consumed_below: 0,
                consumed_gaps: BTreeSet::new(),
            }),
            ready: Condvar::new(),
            stall_warning,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, CollectorState<T>>, SyncError> {
        self.state.lock().map_err(|_| SyncError::InterruptedWait)
    }

    /// Records `value` from `sender` for `step` and wakes waiters.
    ///
    /// A repeated sender replaces its earlier value (last write wins).
    /// Returns `Ok(false)` when the put was discarded because the step was
    /// already consumed or the collector is closed.
    pub fn put(&self, step: u64, sender: SenderKey, value: T) -> Result<bool, SyncError> {
        let mut state = self.lock()?;
        if state.closed {
            debug!(step, %sender, "Collector closed, dropping update");
            return Ok(false);
        }
        if state.is_consumed(step) {
            debug!(step, %sender, "Step already consumed, dropping late update");
            return Ok(false);
        }

        state.buckets.entry(step).or_default().insert(sender, value);
        self.ready.notify_all();
        Ok(true)
    }

    /// Blocks until `expected` distinct senders reported for `step`.
    ///
    /// The completed bucket is removed atomically, so a second waiter on the
    /// same step keeps blocking until shutdown.
    ///
    /// # Errors
    /// `SyncError::InterruptedWait` if the lock was poisoned.
    pub fn await_step(&self, step: u64, expected: usize) -> Result<StepUpdates<T>, SyncError> {
        let mut state = self.lock()?;
        let mut stalled = Duration::ZERO;

        loop {
            if state.closed {
                return Ok(StepUpdates::Aborted);
            }

            let received = state.buckets.get(&step).map_or(0, BTreeMap::len);
            if received >= expected {
                let bucket = state.buckets.remove(&step).unwrap_or_default();
                state.mark_consumed(step);
                return Ok(StepUpdates::Complete(bucket));
            }

            match self.stall_warning {
                Some(interval) => {
                    let (guard, timeout) = self
                        .ready
                        .wait_timeout(state, interval)
                        .map_err(|_| SyncError::InterruptedWait)?;
                    state = guard;
                    if timeout.timed_out() {
                        stalled += interval;
                        warn!(
                            step,
                            received,
                            expected,
                            stalled_ms = stalled.as_millis() as u64,
                            "Step stalled waiting for neighbour updates"
                        );
                    }
                }
                None => {
                    state = self.ready.wait(state).map_err(|_| SyncError::InterruptedWait)?;
                }
            }
        }
    }

    /// Releases every waiter with [`StepUpdates::Aborted`].
    ///
    /// Idempotent; later puts are discarded and later waits return at once.
    pub fn force_unblock(&self) {
        // Shutdown must go through even if a panicking thread poisoned the lock
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !state.closed {
            state.closed = true;
            info!(pending_steps = state.buckets.len(), "Collector force-unblocked");
        }
        self.ready.notify_all();
    }

    /// Panics on a helper thread while holding the lock.
    #[cfg(test)]
    pub(crate) fn poison(&self)
    where
        T: Send,
    {
        std::thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _guard = self.state.lock();
                    panic!("collector poisoned on purpose");
                })
                .join();
        });
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|s| s.closed).unwrap_or(true)
    }

    /// Steps with at least one update waiting, ascending.
    pub fn pending_steps(&self) -> Vec<u64> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        let mut steps: Vec<u64> = state.buckets.keys().copied().collect();
        steps.sort_unstable();
        steps
    }

    /// Distinct senders recorded so far for `step`.
    pub fn received(&self, step: u64) -> usize {
        self.lock()
            .map(|s| s.buckets.get(&step).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }
}
