// SPDX-License-Identifier: GPL-2.0-only
// Copyright (C) 2024 Ankit Kumar Pandey <ankitkpandey1@gmail.com>

//! # Host Runtime Interface
//!
//! The checkpoint never owns the machinery it drives. The pending-call
//! dispatcher, the global execution lock and the pending-work flags all
//! belong to the host runtime, which exposes them through [`HostRuntime`].
//!
//! ## Implementations
//!
//! - [`LocalHost`](crate::local::LocalHost): in-process reference host
//! - Embedding runtimes implement the trait over their own thread states

use crate::error::DispatchFailure;
use crate::thread::ThreadContext;
use std::sync::Arc;
use yieldpoint_common::PendingFlags;

/// Host runtime collaborators consumed by a checkpoint
///
/// All methods are called on the thread that owns `thread`, while that
/// thread holds the execution lock (except between `release_lock` and
/// `acquire_lock`).
pub trait HostRuntime: Send + Sync {
    /// Drain the queue of pending calls (and pending signal handlers).
    ///
    /// On failure the host should leave the failing call's error active on
    /// `thread`; the checkpoint only propagates failures that did.
    fn make_pending_calls(&self, thread: &ThreadContext) -> Result<(), DispatchFailure>;

    /// Whether more than one thread has used the execution lock.
    ///
    /// The counter strategy skips the lock yield while this is false.
    fn threads_initialized(&self) -> bool;

    /// Give up the execution lock held by `thread`.
    fn release_lock(&self, thread: &ThreadContext);

    /// Block until `thread` holds the execution lock again.
    ///
    /// Must not return without the lock.
    fn acquire_lock(&self, thread: &ThreadContext);

    /// Snapshot of the pending-work flags for `thread`.
    ///
    /// Only the flag strategy calls this. Hosts without flags keep the
    /// default, which reports nothing pending.
    fn read_pending_flags(&self, _thread: &ThreadContext) -> PendingFlags {
        PendingFlags::EMPTY
    }
}

impl<H: HostRuntime + ?Sized> HostRuntime for Arc<H> {
    fn make_pending_calls(&self, thread: &ThreadContext) -> Result<(), DispatchFailure> {
        (**self).make_pending_calls(thread)
    }

    fn threads_initialized(&self) -> bool {
        (**self).threads_initialized()
    }

    fn release_lock(&self, thread: &ThreadContext) {
        (**self).release_lock(thread)
    }

    fn acquire_lock(&self, thread: &ThreadContext) {
        (**self).acquire_lock(thread)
    }

    fn read_pending_flags(&self, thread: &ThreadContext) -> PendingFlags {
        (**self).read_pending_flags(thread)
    }
}
