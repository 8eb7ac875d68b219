//! # Yieldpoint Runtime
//!
//! Cooperative preemption checkpoints for runtimes whose code runs under a
//! single global execution lock.
//!
//! Guarded code calls a checkpoint at loop back-edges, function entries and
//! similar safe points. The checkpoint lets the host interleave other work
//! without preempting the thread:
//!
//! 1. it runs pending calls queued for the thread,
//! 2. it yields the execution lock so another thread can take a turn,
//! 3. it delivers an async exception another thread targeted at this one.
//!
//! ## Key Components
//!
//! - **Counter strategy**: samples with a shared tick counter, for hosts
//!   without cheap pending-work flags
//! - **Flag strategy**: reads the host's pending-work flags on every call
//! - **Host Runtime**: the trait through which the dispatcher, the lock and
//!   the flags are reached
//! - **Local Host**: in-process reference host
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use yieldpoint_runtime::{checkpoint, Builder, Checkpoint, LocalHost, Propagate};
//! use yieldpoint_runtime::ThreadContext;
//!
//! fn hot_loop(cp: &Checkpoint<Arc<LocalHost>>, t: &ThreadContext) -> Result<(), Propagate> {
//!     for _ in 0..1_000_000 {
//!         // ... compute ...
//!         checkpoint!(cp, t);
//!     }
//!     Ok(())
//! }
//!
//! let host = Arc::new(LocalHost::default());
//! let cp = Builder::new().build(host.clone()).unwrap();
//! let t = host.attach(Some("main"));
//! hot_loop(&cp, &t).unwrap();
//! host.detach(t).unwrap();
//! ```

pub mod checkpoint;
pub mod counter;
pub mod error;
pub mod flags;
pub mod host;
pub mod local;
pub mod lock;
mod sequence;
pub mod thread;

pub use checkpoint::{Builder, Checkpoint, CheckpointConfig, CheckpointStats, Strategy};
pub use counter::{CounterCheckpoint, TickCounter};
pub use error::{DispatchFailure, Error, ExceptionValue, Propagate, Result};
pub use flags::FlagCheckpoint;
pub use host::HostRuntime;
pub use local::{LocalHost, LocalHostConfig, PendingCall};
pub use lock::{yield_lock, GlobalLock};
pub use thread::{AsyncExcHandle, ThreadContext, ThreadState};

/// Re-export common types
pub use yieldpoint_common::{
    DropSignal, FlagLayout, HostCapabilities, HostVersion, PendingFlags, StrategyKind,
};

/// Run a checkpoint and return early on [`Propagate`].
///
/// Expands to `$cp.check($thread)?`, so the enclosing function must return
/// a `Result` whose error type converts from `Propagate`.
///
/// # Example
///
/// ```rust,no_run
/// use yieldpoint_runtime::{checkpoint, Checkpoint, LocalHost, Propagate, ThreadContext};
///
/// fn sum(cp: &Checkpoint<LocalHost>, t: &ThreadContext, data: &[u64]) -> Result<u64, Propagate> {
///     let mut total = 0;
///     for (i, x) in data.iter().enumerate() {
///         if i % 1000 == 0 {
///             checkpoint!(cp, t);
///         }
///         total += x;
///     }
///     Ok(total)
/// }
/// ```
#[macro_export]
macro_rules! checkpoint {
    ($cp:expr, $thread:expr) => {
        $cp.check($thread)?
    };
}
