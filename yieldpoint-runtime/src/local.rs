// SPDX-License-Identifier: GPL-2.0-only
// Copyright (C) 2024 Ankit Kumar Pandey <ankitkpandey1@gmail.com>

//! # In-process Reference Host
//!
//! [`LocalHost`] implements [`HostRuntime`] without an embedding runtime:
//!
//! - a [`GlobalLock`] with a switch interval and drop requests
//! - a queue of pending calls and a queue of tripped signal handlers
//! - a registry of attached threads, so exceptions can be raised by ID
//!
//! It reports its pending-work flags the way the host version in its
//! [`LocalHostConfig`] would, so both strategies and every flag layout can
//! be driven end to end.

use crate::error::{DispatchFailure, Error, ExceptionValue, Result};
use crate::host::HostRuntime;
use crate::lock::GlobalLock;
use crate::thread::{AsyncExcHandle, ThreadContext, ThreadState};
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use yieldpoint_common::{
    config, DropSignal, FlagLayout, HostCapabilities, HostVersion, PendingFlags,
    EVAL_ASYNC_EXC, EVAL_CALLS_TO_DO, EVAL_DROP_REQUEST, EVAL_PENDING_SIGNALS,
};

/// Work queued for the next thread that dispatches
///
/// An `Err` becomes the dispatching thread's active error.
pub type PendingCall =
    Box<dyn FnOnce(&ThreadContext) -> std::result::Result<(), ExceptionValue> + Send>;

/// Reference host configuration
#[derive(Debug, Clone)]
pub struct LocalHostConfig {
    /// Host version to emulate when reporting flags
    pub version: HostVersion,

    /// How long a waiter blocks before requesting a lock drop
    pub switch_interval: Duration,
}

impl Default for LocalHostConfig {
    fn default() -> Self {
        Self {
            version: HostVersion::new(3, 12),
            switch_interval: Duration::from_micros(config::DEFAULT_SWITCH_INTERVAL_US),
        }
    }
}

/// In-process host runtime
pub struct LocalHost {
    config: LocalHostConfig,
    caps: HostCapabilities,
    lock: GlobalLock,
    signals: SegQueue<PendingCall>,
    calls: SegQueue<PendingCall>,
    /// Set while a thread drains the queues; nested dispatches return early
    dispatching: AtomicBool,
    next_thread_id: AtomicU64,
    threads: Mutex<HashMap<u64, Arc<ThreadState>>>,
}

impl LocalHost {
    pub fn new(config: LocalHostConfig) -> Self {
        let caps = config.version.capabilities();
        info!(
            "local host created: version={}.{}, free_threaded={}, switch_interval={:?}",
            config.version.major,
            config.version.minor,
            config.version.free_threaded,
            config.switch_interval
        );

        Self {
            caps,
            lock: GlobalLock::new(config.switch_interval),
            config,
            signals: SegQueue::new(),
            calls: SegQueue::new(),
            dispatching: AtomicBool::new(false),
            // 0 is reserved for "no owner"
            next_thread_id: AtomicU64::new(1),
            threads: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LocalHostConfig {
        &self.config
    }

    /// Capabilities of the emulated host version
    pub fn capabilities(&self) -> HostCapabilities {
        self.caps
    }

    pub fn lock(&self) -> &GlobalLock {
        &self.lock
    }

    /// Register the calling thread and take the execution lock
    ///
    /// Blocks until the lock is available.
    pub fn attach(&self, name: Option<&str>) -> ThreadContext {
        let id = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(ThreadState::new(id, name.map(str::to_owned)));

        let attached = {
            let mut threads = self.threads.lock();
            threads.insert(id, state.clone());
            threads.len()
        };
        if attached > 1 {
            self.lock.mark_initialized();
        }

        info!(thread = id, name = ?name, "thread attached");
        self.lock.acquire(id);
        ThreadContext::new(state)
    }

    /// Unregister the thread and release its execution lock
    ///
    /// The thread is unregistered even when it did not hold the lock.
    pub fn detach(&self, thread: ThreadContext) -> Result<()> {
        let id = thread.id();
        self.threads.lock().remove(&id);
        self.lock.release(id)?;
        info!(thread = id, "thread detached");
        Ok(())
    }

    /// Run `f` without the execution lock
    ///
    /// For blocking work that does not touch guarded state. The lock is
    /// re-acquired before returning.
    pub fn allow_threads<R>(&self, thread: &ThreadContext, f: impl FnOnce() -> R) -> R {
        self.release_lock(thread);
        let result = f();
        self.acquire_lock(thread);
        result
    }

    /// Queue a call for the next dispatching thread
    pub fn add_pending_call<F>(&self, call: F)
    where
        F: FnOnce(&ThreadContext) -> std::result::Result<(), ExceptionValue> + Send + 'static,
    {
        self.calls.push(Box::new(call));
    }

    /// Queue a signal handler; handlers run before pending calls
    pub fn trip_signal<F>(&self, handler: F)
    where
        F: FnOnce(&ThreadContext) -> std::result::Result<(), ExceptionValue> + Send + 'static,
    {
        self.signals.push(Box::new(handler));
    }

    /// Raise `exc` asynchronously in thread `thread_id`
    pub fn raise_async_exc(&self, thread_id: u64, exc: ExceptionValue) -> Result<()> {
        let handle = self
            .async_exc_handle(thread_id)
            .ok_or(Error::UnknownThread(thread_id))?;

        handle.raise(exc).map_err(|rejected| {
            warn!(thread = thread_id, exc = %rejected, "async exception rejected, one is already pending");
            Error::AsyncExcPending(thread_id)
        })
    }

    /// Interrupt handle for an attached thread
    pub fn async_exc_handle(&self, thread_id: u64) -> Option<AsyncExcHandle> {
        self.threads
            .lock()
            .get(&thread_id)
            .cloned()
            .map(AsyncExcHandle::new)
    }

    /// IDs of all attached threads
    pub fn thread_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.threads.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Run what was queued when draining started; work queued by the calls
    /// themselves waits for the next dispatch.
    fn drain(
        &self,
        queue: &SegQueue<PendingCall>,
        thread: &ThreadContext,
    ) -> std::result::Result<(), DispatchFailure> {
        for _ in 0..queue.len() {
            let Some(call) = queue.pop() else {
                break;
            };

            if let Err(exc) = call(thread) {
                let failure = DispatchFailure::new(exc.to_string());
                thread.set_error(exc);
                return Err(failure);
            }
        }
        Ok(())
    }
}

/// Clears the dispatching flag when dropped, including on unwind
struct DispatchGuard<'a>(&'a AtomicBool);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new(LocalHostConfig::default())
    }
}

impl HostRuntime for LocalHost {
    fn make_pending_calls(&self, thread: &ThreadContext) -> std::result::Result<(), DispatchFailure> {
        if self.dispatching.swap(true, Ordering::Acquire) {
            debug!(thread = thread.id(), "nested dispatch skipped");
            return Ok(());
        }
        let _guard = DispatchGuard(&self.dispatching);

        self.drain(&self.signals, thread)
            .and_then(|()| self.drain(&self.calls, thread))
    }

    fn threads_initialized(&self) -> bool {
        self.lock.is_initialized()
    }

    fn release_lock(&self, thread: &ThreadContext) {
        self.lock.release_or_log(thread.id());
    }

    fn acquire_lock(&self, thread: &ThreadContext) {
        self.lock.acquire(thread.id());
    }

    fn read_pending_flags(&self, thread: &ThreadContext) -> PendingFlags {
        let signals = !self.signals.is_empty();
        let calls = !self.calls.is_empty();
        let drop_requested = self.lock.drop_requested();

        match self.caps.drop_signal {
            DropSignal::EvalBreaker => {
                let mut bits = 0;
                if signals {
                    bits |= EVAL_PENDING_SIGNALS;
                }
                if calls {
                    bits |= EVAL_CALLS_TO_DO;
                }
                if drop_requested {
                    bits |= EVAL_DROP_REQUEST;
                }
                if thread.state().has_pending_async_exception() {
                    bits |= EVAL_ASYNC_EXC;
                }
                PendingFlags::from_eval_breaker(bits)
            }
            DropSignal::DropRequestFlag => match self.caps.flag_layout {
                FlagLayout::CallsOnly => PendingFlags {
                    calls_to_do: calls || signals,
                    lock_drop_requested: drop_requested,
                    ..PendingFlags::EMPTY
                },
                FlagLayout::SignalsSplit => PendingFlags {
                    signals_pending: signals,
                    calls_to_do: calls,
                    lock_drop_requested: drop_requested,
                    eval_breaker: 0,
                },
            },
        }
    }
}
