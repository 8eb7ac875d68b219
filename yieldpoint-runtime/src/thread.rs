//! Thread execution contexts
//!
//! Each thread running guarded code has one [`ThreadState`], shared with the
//! host and with any thread that may interrupt it, and one [`ThreadContext`],
//! the owner-only handle the checkpoint works through.
//!
//! # Async exception slot
//!
//! The slot holds at most one undelivered exception. Other threads only ever
//! set it, through an [`AsyncExcHandle`], and only when it is empty. The
//! owning thread only ever claims it, which reads and clears in one step.
//! `ThreadContext` is `!Send` and `!Sync`, so a claim cannot happen anywhere
//! but on the owning thread.

use crate::error::ExceptionValue;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Per-thread state shared between the owner and other threads
#[derive(Debug)]
pub struct ThreadState {
    id: u64,
    name: Option<String>,
    /// Set with the slot; lets the owner skip the slot lock when empty
    has_async_exc: AtomicBool,
    async_exc: Mutex<Option<ExceptionValue>>,
}

impl ThreadState {
    /// Create the state for a thread with a host-assigned ID
    pub fn new(id: u64, name: Option<String>) -> Self {
        Self {
            id,
            name,
            has_async_exc: AtomicBool::new(false),
            async_exc: Mutex::new(None),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether an async exception is waiting for delivery
    #[inline]
    pub fn has_pending_async_exception(&self) -> bool {
        self.has_async_exc.load(Ordering::Acquire)
    }

    /// Store `exc` if the slot is empty, otherwise hand it back.
    fn raise(&self, exc: ExceptionValue) -> Result<(), ExceptionValue> {
        let mut slot = self.async_exc.lock();
        if slot.is_some() {
            return Err(exc);
        }
        *slot = Some(exc);
        self.has_async_exc.store(true, Ordering::Release);
        Ok(())
    }

    fn claim(&self) -> Option<ExceptionValue> {
        if !self.has_pending_async_exception() {
            return None;
        }

        let mut slot = self.async_exc.lock();
        let exc = slot.take();
        self.has_async_exc.store(false, Ordering::Release);
        exc
    }
}

/// Cross-thread handle for raising an async exception in another thread
#[derive(Debug, Clone)]
pub struct AsyncExcHandle {
    state: Arc<ThreadState>,
}

impl AsyncExcHandle {
    pub fn new(state: Arc<ThreadState>) -> Self {
        Self { state }
    }

    /// ID of the target thread
    pub fn thread_id(&self) -> u64 {
        self.state.id()
    }

    /// Target the thread with `exc`
    ///
    /// Fails, returning `exc` unchanged, if an earlier exception has not been
    /// delivered yet. The exception is delivered at the target's next
    /// checkpoint that reaches the async exception check.
    pub fn raise(&self, exc: ExceptionValue) -> Result<(), ExceptionValue> {
        self.state.raise(exc)
    }

    /// Whether the target still has an undelivered exception
    pub fn is_pending(&self) -> bool {
        self.state.has_pending_async_exception()
    }
}

/// Owner-only view of a thread's execution context
///
/// Holds the thread's active error state alongside the shared
/// [`ThreadState`].
///
/// # Thread Safety
///
/// This type is intentionally `!Send` and `!Sync`: claiming the async
/// exception and touching the active error are owner-thread operations.
pub struct ThreadContext {
    state: Arc<ThreadState>,
    error: RefCell<Option<ExceptionValue>>,
    /// *const () is !Send and !Sync
    _marker: PhantomData<*const ()>,
}

impl ThreadContext {
    /// Wrap a thread's shared state; call on the thread that owns it
    pub fn new(state: Arc<ThreadState>) -> Self {
        Self {
            state,
            error: RefCell::new(None),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.state.id()
    }

    /// The shared part of this context
    pub fn state(&self) -> &Arc<ThreadState> {
        &self.state
    }

    /// A handle other threads can use to interrupt this one
    pub fn async_exc_handle(&self) -> AsyncExcHandle {
        AsyncExcHandle::new(self.state.clone())
    }

    /// Take the pending async exception, if any
    ///
    /// Returns each raised exception exactly once. When the slot is empty
    /// this only performs a load.
    #[inline]
    pub fn claim_async_exception(&self) -> Option<ExceptionValue> {
        let exc = self.state.claim();
        if let Some(ref exc) = exc {
            debug!(thread = self.id(), %exc, "claimed async exception");
        }
        exc
    }

    /// Install `err` as the active error, replacing any previous one
    pub fn set_error(&self, err: ExceptionValue) {
        *self.error.borrow_mut() = Some(err);
    }

    /// Whether an error is active on this thread
    #[inline]
    pub fn error_occurred(&self) -> bool {
        self.error.borrow().is_some()
    }

    /// The active error, if any
    pub fn error(&self) -> Option<ExceptionValue> {
        self.error.borrow().clone()
    }

    /// Clear and return the active error
    pub fn take_error(&self) -> Option<ExceptionValue> {
        self.error.borrow_mut().take()
    }
}

impl std::fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadContext")
            .field("id", &self.id())
            .field("error", &self.error.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(id: u64) -> ThreadContext {
        ThreadContext::new(Arc::new(ThreadState::new(id, None)))
    }

    #[test]
    fn test_claim_is_exactly_once() {
        let ctx = context(1);
        let exc = ExceptionValue::new("KeyboardInterrupt", "");

        ctx.async_exc_handle().raise(exc.clone()).unwrap();
        assert!(ctx.state().has_pending_async_exception());

        assert_eq!(ctx.claim_async_exception(), Some(exc));
        assert_eq!(ctx.claim_async_exception(), None);
        assert!(!ctx.state().has_pending_async_exception());
    }

    #[test]
    fn test_raise_rejected_while_pending() {
        let ctx = context(2);
        let handle = ctx.async_exc_handle();
        let first = ExceptionValue::new("SystemExit", "first");
        let second = ExceptionValue::new("SystemExit", "second");

        handle.raise(first.clone()).unwrap();
        assert_eq!(handle.raise(second.clone()), Err(second.clone()));

        // Once delivered, the slot accepts a new one
        assert_eq!(ctx.claim_async_exception(), Some(first));
        handle.raise(second.clone()).unwrap();
        assert_eq!(ctx.claim_async_exception(), Some(second));
    }

    #[test]
    fn test_raise_from_other_thread() {
        let ctx = context(3);
        let handle = ctx.async_exc_handle();

        std::thread::spawn(move || {
            handle
                .raise(ExceptionValue::new("RuntimeError", "from afar"))
                .unwrap();
        })
        .join()
        .unwrap();

        let exc = ctx.claim_async_exception().unwrap();
        assert_eq!(exc.kind(), "RuntimeError");
        assert_eq!(exc.message(), "from afar");
    }

    #[test]
    fn test_active_error() {
        let ctx = context(4);
        assert!(!ctx.error_occurred());

        ctx.set_error(ExceptionValue::new("ValueError", "bad"));
        assert!(ctx.error_occurred());
        assert_eq!(ctx.error().unwrap().kind(), "ValueError");

        assert!(ctx.take_error().is_some());
        assert!(!ctx.error_occurred());
    }

    #[test]
    fn test_context_not_send_or_sync() {
        static_assertions::assert_not_impl_any!(ThreadContext: Send, Sync);
        static_assertions::assert_impl_all!(AsyncExcHandle: Send, Sync);
        static_assertions::assert_impl_all!(ThreadState: Send, Sync);
    }
}
