//! Checkpoint builder and entry point
//!
//! A [`Checkpoint`] pairs a host with the strategy chosen for it. The
//! strategy is fixed when the checkpoint is built, either explicitly or from
//! the host's version, and never re-evaluated per call.

use crate::counter::{CounterCheckpoint, TickCounter};
use crate::error::{Error, Propagate, Result};
use crate::flags::FlagCheckpoint;
use crate::host::HostRuntime;
use crate::thread::ThreadContext;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;
use yieldpoint_common::{config, DropSignal, FlagLayout, HostVersion, StrategyKind};

/// Checkpoint configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// Free calls between full checks (counter strategy)
    pub check_interval: u32,

    /// Which algorithm to run
    pub strategy: StrategyKind,

    /// How the host reports pending work (flag strategy)
    pub flag_layout: FlagLayout,

    /// How the host reports lock drop requests (flag strategy)
    pub drop_signal: DropSignal,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            check_interval: config::DEFAULT_CHECK_INTERVAL,
            strategy: StrategyKind::Counter,
            flag_layout: FlagLayout::default(),
            drop_signal: DropSignal::default(),
        }
    }
}

/// Slow-path statistics
///
/// Only the paths that do work count anything; a checkpoint that returns
/// straight away touches none of these.
#[derive(Debug, Default)]
pub struct CheckpointStats {
    /// Counter expirations (counter strategy)
    pub fired: AtomicU64,
    /// Pending-call dispatches
    pub dispatches: AtomicU64,
    /// Dispatches that propagated a failure
    pub dispatch_failures: AtomicU64,
    /// Lock yields
    pub yields: AtomicU64,
    /// Async exceptions delivered
    pub async_exceptions: AtomicU64,
}

impl CheckpointStats {
    pub(crate) fn record_fired(&self) {
        self.fired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_yield(&self) {
        self.yields.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_async_exception(&self) {
        self.async_exceptions.fetch_add(1, Ordering::Relaxed);
    }
}

/// The compiled-in checkpoint algorithm
#[derive(Debug, Clone)]
pub enum Strategy {
    Counter(CounterCheckpoint),
    Flag(FlagCheckpoint),
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Counter(_) => StrategyKind::Counter,
            Strategy::Flag(_) => StrategyKind::Flag,
        }
    }
}

/// Checkpoint builder
pub struct Builder {
    config: CheckpointConfig,
    counter: Option<Arc<TickCounter>>,
}

impl Builder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: CheckpointConfig::default(),
            counter: None,
        }
    }

    /// Set the check interval (counter strategy)
    pub fn check_interval(mut self, interval: u32) -> Self {
        self.config.check_interval = interval;
        self
    }

    /// Use the counter strategy
    pub fn counter(mut self) -> Self {
        self.config.strategy = StrategyKind::Counter;
        self
    }

    /// Use the flag strategy
    pub fn flags(mut self, layout: FlagLayout, drop_signal: DropSignal) -> Self {
        self.config.strategy = StrategyKind::Flag;
        self.config.flag_layout = layout;
        self.config.drop_signal = drop_signal;
        self
    }

    /// Pick the strategy the given host version supports
    pub fn host_version(mut self, version: HostVersion) -> Self {
        let caps = version.capabilities();
        self.config.strategy = caps.strategy;
        self.config.flag_layout = caps.flag_layout;
        self.config.drop_signal = caps.drop_signal;
        self
    }

    /// Share an existing tick counter instead of creating one
    ///
    /// The counter's own interval wins over
    /// [`check_interval`](Self::check_interval).
    pub fn tick_counter(mut self, counter: Arc<TickCounter>) -> Self {
        self.config.check_interval = counter.interval();
        self.counter = Some(counter);
        self
    }

    /// Build the checkpoint for `host`
    pub fn build<H: HostRuntime>(self, host: H) -> Result<Checkpoint<H>> {
        let Builder { mut config, counter } = self;

        // A shared counter carries its own interval
        if let Some(counter) = &counter {
            config.check_interval = counter.interval();
        }

        if config.check_interval == 0 {
            return Err(Error::InvalidInterval(config.check_interval));
        }

        let strategy = match config.strategy {
            StrategyKind::Counter => {
                let counter =
                    counter.unwrap_or_else(|| Arc::new(TickCounter::new(config.check_interval)));
                Strategy::Counter(CounterCheckpoint::new(counter))
            }
            StrategyKind::Flag => {
                Strategy::Flag(FlagCheckpoint::new(config.flag_layout, config.drop_signal))
            }
        };

        info!(
            "checkpoint built: strategy={:?}, interval={}, layout={:?}, drop_signal={:?}",
            config.strategy, config.check_interval, config.flag_layout, config.drop_signal
        );

        Ok(Checkpoint {
            host,
            strategy,
            config,
            stats: CheckpointStats::default(),
        })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative preemption checkpoint
///
/// Call [`check`](Self::check) at loop back-edges, function entries and
/// other safe points of code that runs under the host's execution lock.
pub struct Checkpoint<H> {
    host: H,
    strategy: Strategy,
    config: CheckpointConfig,
    stats: CheckpointStats,
}

impl<H: HostRuntime> Checkpoint<H> {
    /// Run pending calls, yield the lock and deliver async exceptions as
    /// the strategy decides
    ///
    /// `Ok(())` means carry on. `Err` means an error is now active on
    /// `thread` and the caller must unwind its current operation.
    #[inline]
    pub fn check(&self, thread: &ThreadContext) -> std::result::Result<(), Propagate> {
        match &self.strategy {
            Strategy::Counter(counter) => counter.check(&self.host, thread, &self.stats),
            Strategy::Flag(flags) => flags.check(&self.host, thread, &self.stats),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    pub fn stats(&self) -> &CheckpointStats {
        &self.stats
    }
}
