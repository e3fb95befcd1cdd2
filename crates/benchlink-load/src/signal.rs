//! Byte-arrival notification between the observer thread and the engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use benchlink_transport::ArrivalProbe;

use crate::stats::TransactionStats;

/// Single-slot, manually reset "a full frame is waiting" flag.
///
/// The observer calls [`notify`](Self::notify) with the number of bytes it
/// sees; the flag is only set once that reaches the threshold. Notifications
/// below the threshold are counted as spurious and otherwise ignored. The
/// flag stays set until [`reset`](Self::reset).
#[derive(Debug)]
pub struct ArrivalSignal {
    set: Mutex<bool>,
    cond: Condvar,
    threshold: usize,
    stats: Arc<TransactionStats>,
}

impl ArrivalSignal {
    pub fn new(threshold: usize, stats: Arc<TransactionStats>) -> Self {
        Self {
            set: Mutex::new(false),
            cond: Condvar::new(),
            threshold,
            stats,
        }
    }

    /// Report `available` received bytes. Returns whether the flag was set.
    pub fn notify(&self, available: usize) -> bool {
        if available < self.threshold {
            self.stats.record_spurious_arrival();
            tracing::trace!(available, threshold = self.threshold, "spurious arrival");
            return false;
        }
        *self.lock() = true;
        self.cond.notify_all();
        true
    }

    /// Clear the flag.
    pub fn reset(&self) {
        *self.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.lock()
    }

    /// Block until the flag is set or `timeout` passes. Returns whether it
    /// was set. Does not clear the flag.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decides which polled byte counts are worth reporting to the signal.
///
/// A full frame is always reported. A partial count is reported once when it
/// stalls (the same count on two consecutive polls) or when it shrinks before
/// reaching the threshold. A count that is still growing is not reported.
#[derive(Debug)]
struct PartialTracker {
    threshold: usize,
    last: usize,
    reported: bool,
}

impl PartialTracker {
    fn new(threshold: usize) -> Self {
        Self {
            threshold,
            last: 0,
            reported: false,
        }
    }

    /// Feed one poll result. Returns the count to notify, if any.
    fn observe(&mut self, available: usize) -> Option<usize> {
        let previous = std::mem::replace(&mut self.last, available);
        if available >= self.threshold {
            self.reported = false;
            return Some(available);
        }

        let was_partial = previous > 0 && previous < self.threshold;
        if available == previous {
            if was_partial && !self.reported {
                self.reported = true;
                return Some(available);
            }
            return None;
        }

        let unreported = was_partial && !self.reported;
        self.reported = false;
        if available < previous && unreported {
            return Some(previous);
        }
        None
    }
}

/// Background thread that polls a channel for pending bytes and feeds an
/// [`ArrivalSignal`].
///
/// Every poll that finds at least a frame's worth of bytes notifies the
/// signal. Partial counts are filtered by [`PartialTracker`], so only a
/// stalled or vanished partial arrival is recorded as spurious.
pub struct ArrivalObserver {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ArrivalObserver {
    pub fn spawn(
        mut probe: Box<dyn ArrivalProbe>,
        signal: Arc<ArrivalSignal>,
        poll_interval: Duration,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("benchlink-arrival".to_string())
            .spawn(move || {
                let mut tracker = PartialTracker::new(signal.threshold);
                while !stop_flag.load(Ordering::Acquire) {
                    match probe.bytes_available() {
                        Ok(available) => {
                            if let Some(count) = tracker.observe(available) {
                                signal.notify(count);
                            }
                        }
                        Err(err) => {
                            tracing::debug!(error = %err, "arrival probe failed");
                        }
                    }
                    thread::sleep(poll_interval);
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop polling and join the thread. Safe to call more than once.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("arrival observer thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for ArrivalObserver {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ArrivalObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrivalObserver")
            .field("running", &self.is_running())
            .finish()
    }
}
