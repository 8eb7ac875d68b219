//! Global execution lock and the lock yield
//!
//! [`GlobalLock`] is the reference implementation of the single lock that
//! serializes guarded code. It is built on a raw `parking_lot` mutex so the
//! lock can be held across calls without a guard, and so that a release can
//! hand the lock straight to a parked waiter.
//!
//! # Drop requests
//!
//! A waiter that cannot get the lock within the switch interval raises the
//! drop request and keeps waiting. The holder sees the request at its next
//! flag checkpoint and yields. Whoever acquires the lock next clears the
//! request.

use crate::error::{Error, Result};
use crate::host::HostRuntime;
use crate::thread::ThreadContext;
use parking_lot::lock_api::{RawMutex as _, RawMutexFair as _, RawMutexTimed as _};
use parking_lot::RawMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{error, trace};

const NO_OWNER: u64 = 0;

/// Voluntary preemption point
///
/// Releases the execution lock held by `thread` and re-acquires it before
/// returning. This is the only checkpoint step that blocks; it always
/// returns with the lock held and cannot be cancelled.
pub fn yield_lock<H: HostRuntime + ?Sized>(host: &H, thread: &ThreadContext) {
    host.release_lock(thread);
    host.acquire_lock(thread);
}

/// Single global execution lock
pub struct GlobalLock {
    raw: RawMutex,
    /// Current holder, `NO_OWNER` when free. Written only by the holder.
    owner: AtomicU64,
    /// Previous holder, for switch accounting
    last_owner: AtomicU64,
    drop_request: AtomicBool,
    /// Sticky: set once a second thread has used the lock
    initialized: AtomicBool,
    switch_interval: Duration,
    switches: AtomicU64,
}

impl GlobalLock {
    /// Create an unlocked lock
    ///
    /// # Arguments
    /// * `switch_interval` - How long a waiter blocks before raising the
    ///   drop request
    pub fn new(switch_interval: Duration) -> Self {
        Self {
            raw: RawMutex::INIT,
            owner: AtomicU64::new(NO_OWNER),
            last_owner: AtomicU64::new(NO_OWNER),
            drop_request: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            switch_interval,
            switches: AtomicU64::new(0),
        }
    }

    /// Block until `thread_id` holds the lock
    ///
    /// # Panics
    /// If `thread_id` is 0, which is reserved for "no owner".
    pub fn acquire(&self, thread_id: u64) {
        assert_ne!(thread_id, NO_OWNER, "thread ID 0 is reserved");

        while !self.raw.try_lock_for(self.switch_interval) {
            if !self.drop_request.swap(true, Ordering::AcqRel) {
                trace!(thread = thread_id, "requesting execution lock drop");
            }
        }

        self.drop_request.store(false, Ordering::Release);
        self.owner.store(thread_id, Ordering::Release);

        let previous = self.last_owner.swap(thread_id, Ordering::Relaxed);
        if previous != thread_id {
            self.switches.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Give up the lock held by `thread_id`
    ///
    /// A parked waiter, if any, receives the lock directly.
    pub fn release(&self, thread_id: u64) -> Result<()> {
        if thread_id == NO_OWNER || self.owner.load(Ordering::Acquire) != thread_id {
            return Err(Error::LockNotHeld(thread_id));
        }

        self.owner.store(NO_OWNER, Ordering::Release);
        // SAFETY: `owner` matched a non-zero ID, which only `acquire` stores
        // after locking the raw mutex, so it is locked on behalf of
        // `thread_id` and nobody else may unlock it.
        unsafe { self.raw.unlock_fair() };
        Ok(())
    }

    /// Like [`release`](Self::release), but logs instead of failing.
    pub(crate) fn release_or_log(&self, thread_id: u64) {
        if let Err(e) = self.release(thread_id) {
            error!(thread = thread_id, "lock release ignored: {}", e);
        }
    }

    /// Whether `thread_id` currently holds the lock
    #[inline]
    pub fn held_by(&self, thread_id: u64) -> bool {
        self.owner.load(Ordering::Acquire) == thread_id
    }

    /// Current holder, if any
    pub fn owner(&self) -> Option<u64> {
        match self.owner.load(Ordering::Acquire) {
            NO_OWNER => None,
            id => Some(id),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Whether a waiter asked the holder to drop the lock
    #[inline]
    pub fn drop_requested(&self) -> bool {
        self.drop_request.load(Ordering::Acquire)
    }

    /// Ask the holder to drop the lock at its next checkpoint
    pub fn request_drop(&self) {
        self.drop_request.store(true, Ordering::Release);
    }

    /// Record that more than one thread uses the lock
    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Number of times the lock changed hands
    pub fn switches(&self) -> u64 {
        self.switches.load(Ordering::Relaxed)
    }

    pub fn switch_interval(&self) -> Duration {
        self.switch_interval
    }
}

impl std::fmt::Debug for GlobalLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalLock")
            .field("owner", &self.owner())
            .field("drop_requested", &self.drop_requested())
            .field("initialized", &self.is_initialized())
            .field("switches", &self.switches())
            .finish()
    }
}
