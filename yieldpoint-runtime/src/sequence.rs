//! Steps shared by both strategies
//!
//! Whatever decided that a checkpoint has work to do, the work runs in the
//! same order: pending calls, then the lock yield, then async exception
//! delivery. The lock yield itself lives in [`crate::lock`].

use crate::checkpoint::CheckpointStats;
use crate::error::Propagate;
use crate::host::HostRuntime;
use crate::thread::ThreadContext;
use tracing::{debug, warn};

/// Run the host's pending calls
///
/// A failure propagates only when it left an error active on the thread.
/// Failures without one are logged and execution continues.
pub(crate) fn run_pending_calls<H: HostRuntime + ?Sized>(
    host: &H,
    thread: &ThreadContext,
    stats: &CheckpointStats,
) -> Result<(), Propagate> {
    stats.record_dispatch();

    match host.make_pending_calls(thread) {
        Ok(()) => Ok(()),
        Err(failure) if thread.error_occurred() => {
            stats.record_dispatch_failure();
            debug!(thread = thread.id(), "{}", failure);
            Err(Propagate::Dispatch(failure))
        }
        Err(failure) => {
            warn!(
                thread = thread.id(),
                "{} (no active error, continuing)", failure
            );
            Ok(())
        }
    }
}

/// Claim the thread's async exception and install it as the active error
pub(crate) fn deliver_async_exception(
    thread: &ThreadContext,
    stats: &CheckpointStats,
) -> Result<(), Propagate> {
    match thread.claim_async_exception() {
        None => Ok(()),
        Some(exc) => {
            stats.record_async_exception();
            debug!(thread = thread.id(), %exc, "delivering async exception");
            thread.set_error(exc.clone());
            Err(Propagate::AsyncException(exc))
        }
    }
}
