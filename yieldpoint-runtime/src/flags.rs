//! Flag strategy
//!
//! For hosts that expose pending-work flags cheaply. Every checkpoint reads
//! the flags, so pending work is handled at the very next call instead of
//! after up to a full counter interval.

use crate::checkpoint::CheckpointStats;
use crate::error::Propagate;
use crate::host::HostRuntime;
use crate::lock::yield_lock;
use crate::sequence;
use crate::thread::ThreadContext;
use tracing::trace;
use yieldpoint_common::{DropSignal, FlagLayout, HostCapabilities};

/// Checkpoint that inspects live pending-work flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagCheckpoint {
    layout: FlagLayout,
    drop_signal: DropSignal,
}

impl FlagCheckpoint {
    pub fn new(layout: FlagLayout, drop_signal: DropSignal) -> Self {
        Self {
            layout,
            drop_signal,
        }
    }

    /// Flag checkpoint matching a host's capabilities
    pub fn for_host(caps: HostCapabilities) -> Self {
        Self::new(caps.flag_layout, caps.drop_signal)
    }

    pub fn layout(&self) -> FlagLayout {
        self.layout
    }

    pub fn drop_signal(&self) -> DropSignal {
        self.drop_signal
    }

    #[inline]
    pub(crate) fn check<H: HostRuntime + ?Sized>(
        &self,
        host: &H,
        thread: &ThreadContext,
        stats: &CheckpointStats,
    ) -> Result<(), Propagate> {
        let mut flags = host.read_pending_flags(thread);

        if flags.has_work(self.layout) {
            sequence::run_pending_calls(host, thread, stats)?;
            // The snapshot predates the dispatch
            flags = host.read_pending_flags(thread);
        }

        if flags.drop_requested(self.drop_signal) {
            trace!(thread = thread.id(), "lock drop requested");
            yield_lock(host, thread);
            stats.record_yield();
        }

        sequence::deliver_async_exception(thread, stats)
    }
}
