//! Counter strategy
//!
//! For hosts without cheap pending-work flags. A process-wide tick counter
//! is decremented on every checkpoint; only when it crosses below zero does
//! the checkpoint do any work.

use crate::checkpoint::CheckpointStats;
use crate::error::Propagate;
use crate::host::HostRuntime;
use crate::lock::yield_lock;
use crate::sequence;
use crate::thread::ThreadContext;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Shared tick counter
///
/// The counter is approximate on purpose. Decrements are a relaxed load
/// followed by a relaxed store, not a read-modify-write, so checkpoints on
/// different threads may overwrite each other's ticks. That only moves the
/// moment a full checkpoint runs; it never decides whether pending work,
/// yields or async exceptions are handled correctly.
#[derive(Debug)]
pub struct TickCounter {
    ticks: AtomicI32,
    interval: i32,
}

impl TickCounter {
    /// Create a counter starting at `interval`
    pub fn new(interval: u32) -> Self {
        let interval = i32::try_from(interval).unwrap_or(i32::MAX);
        Self {
            ticks: AtomicI32::new(interval),
            interval,
        }
    }

    /// Count one checkpoint
    ///
    /// Returns `true` when the counter crossed below zero, in which case it
    /// has already been reset to the interval.
    #[inline]
    pub fn tick(&self) -> bool {
        let next = self.ticks.load(Ordering::Relaxed).saturating_sub(1);
        if next >= 0 {
            self.ticks.store(next, Ordering::Relaxed);
            return false;
        }

        self.ticks.store(self.interval, Ordering::Relaxed);
        true
    }

    /// Current tick value
    pub fn current(&self) -> i32 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn interval(&self) -> u32 {
        self.interval as u32
    }

    /// Start a fresh interval
    pub fn reset(&self) {
        self.ticks.store(self.interval, Ordering::Relaxed);
    }
}

/// Checkpoint that samples with a [`TickCounter`]
#[derive(Debug, Clone)]
pub struct CounterCheckpoint {
    counter: Arc<TickCounter>,
}

impl CounterCheckpoint {
    pub fn new(counter: Arc<TickCounter>) -> Self {
        Self { counter }
    }

    pub fn counter(&self) -> &Arc<TickCounter> {
        &self.counter
    }

    #[inline]
    pub(crate) fn check<H: HostRuntime + ?Sized>(
        &self,
        host: &H,
        thread: &ThreadContext,
        stats: &CheckpointStats,
    ) -> Result<(), Propagate> {
        if !self.counter.tick() {
            return Ok(());
        }

        stats.record_fired();
        trace!(thread = thread.id(), "tick counter expired");

        sequence::run_pending_calls(host, thread, stats)?;

        // Reaching here already amortizes the cost, so yield whenever
        // another thread could be waiting.
        if host.threads_initialized() {
            yield_lock(host, thread);
            stats.record_yield();
        }

        sequence::deliver_async_exception(thread, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_cadence() {
        let counter = TickCounter::new(3);

        // `interval` free calls, each taking exactly one tick
        for expected in (0..3).rev() {
            assert!(!counter.tick());
            assert_eq!(counter.current(), expected);
        }

        // The next call crosses below zero and resets
        assert!(counter.tick());
        assert_eq!(counter.current(), 3);

        // And the cycle repeats
        for _ in 0..3 {
            assert!(!counter.tick());
        }
        assert!(counter.tick());
    }

    #[test]
    fn test_interval_one_fires_every_other_call() {
        let counter = TickCounter::new(1);
        let fired: Vec<bool> = (0..6).map(|_| counter.tick()).collect();
        assert_eq!(fired, [false, true, false, true, false, true]);
    }

    #[test]
    fn test_reset() {
        let counter = TickCounter::new(20);
        counter.tick();
        counter.tick();
        assert_eq!(counter.current(), 18);

        counter.reset();
        assert_eq!(counter.current(), 20);
        assert_eq!(counter.interval(), 20);
    }
}
