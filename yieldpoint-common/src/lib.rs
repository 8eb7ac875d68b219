// SPDX-License-Identifier: GPL-2.0-only
// Copyright (C) 2024 Ankit Kumar Pandey <ankitkpandey1@gmail.com>

//! # yieldpoint-common
//!
//! Shared types for Yieldpoint checkpoints and the host runtimes they run in.
//!
//! This crate holds the plain-data side of the host contract: the snapshot of
//! pending-work flags a host exposes, the eval-breaker bit layout used by
//! free-threaded hosts, and the mapping from a host version to the checkpoint
//! strategy that host can support.
//!
//! ## Design Principles
//!
//! - **Host-neutral**: Nothing here knows how a host stores its flags
//! - **Decided once**: Capabilities are derived from a version at startup,
//!   never re-evaluated per checkpoint
//! - **`no_std`**: Usable from generated code and embedded hosts alike

#![no_std]

// ============================================================================
// Configuration Constants
// ============================================================================

/// Configuration defaults shared by runtime and tooling
pub mod config {
    /// Default number of free checkpoint calls between full checks
    /// (counter strategy only)
    pub const DEFAULT_CHECK_INTERVAL: u32 = 20;

    /// Default time a waiter blocks on the global lock before it asks the
    /// holder to drop it (microseconds)
    pub const DEFAULT_SWITCH_INTERVAL_US: u64 = 5_000;
}

// ============================================================================
// Eval Breaker Bits (free-threaded hosts)
// ============================================================================

/// Signal handlers are waiting to run
pub const EVAL_PENDING_SIGNALS: u64 = 1 << 0;

/// Pending calls are queued for this thread
pub const EVAL_CALLS_TO_DO: u64 = 1 << 1;

/// Another thread asked the holder to drop the execution lock
pub const EVAL_DROP_REQUEST: u64 = 1 << 2;

/// An async exception targets this thread
pub const EVAL_ASYNC_EXC: u64 = 1 << 3;

// ============================================================================
// Strategy Selection
// ============================================================================

/// Which checkpoint algorithm a runtime uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    /// Sample with a shared tick counter; run the full sequence only when
    /// the counter crosses below zero.
    #[default]
    Counter,

    /// Inspect the host's pending-work flags on every call.
    Flag,
}

/// How a host reports "there is work to dispatch"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagLayout {
    /// Signals are folded into the calls-to-do flag, so that single flag is
    /// the whole answer.
    CallsOnly,

    /// Signals have their own flag; either one means work is pending.
    #[default]
    SignalsSplit,
}

/// How a host reports "drop the execution lock"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropSignal {
    /// A dedicated drop-request flag
    #[default]
    DropRequestFlag,

    /// The [`EVAL_DROP_REQUEST`] bit of the per-thread eval breaker
    ///
    /// Free-threaded hosts may report drop requests through the
    /// pending-signals bit instead; such a host should set
    /// [`EVAL_DROP_REQUEST`] alongside it when translating its breaker word.
    EvalBreaker,
}

// ============================================================================
// Pending-Work Snapshot
// ============================================================================

/// One read of a host's pending-work state
///
/// Hosts fill in whichever representation they have; the checkpoint reads
/// the fields selected by its [`FlagLayout`] and [`DropSignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingFlags {
    /// Signal handlers are waiting to run
    pub signals_pending: bool,

    /// Pending calls are queued
    pub calls_to_do: bool,

    /// Another thread wants the execution lock
    pub lock_drop_requested: bool,

    /// Raw eval-breaker word, zero for hosts without one
    pub eval_breaker: u64,
}

impl PendingFlags {
    /// Nothing pending
    pub const EMPTY: Self = Self {
        signals_pending: false,
        calls_to_do: false,
        lock_drop_requested: false,
        eval_breaker: 0,
    };

    /// Build a snapshot from an eval-breaker word alone.
    pub const fn from_eval_breaker(bits: u64) -> Self {
        Self {
            signals_pending: bits & EVAL_PENDING_SIGNALS != 0,
            calls_to_do: bits & EVAL_CALLS_TO_DO != 0,
            lock_drop_requested: bits & EVAL_DROP_REQUEST != 0,
            eval_breaker: bits,
        }
    }

    /// Whether the dispatcher has anything to do
    #[inline]
    pub fn has_work(&self, layout: FlagLayout) -> bool {
        match layout {
            FlagLayout::CallsOnly => self.calls_to_do,
            FlagLayout::SignalsSplit => self.signals_pending || self.calls_to_do,
        }
    }

    /// Whether the holder should yield the execution lock
    #[inline]
    pub fn drop_requested(&self, signal: DropSignal) -> bool {
        match signal {
            DropSignal::DropRequestFlag => self.lock_drop_requested,
            DropSignal::EvalBreaker => self.eval_breaker & EVAL_DROP_REQUEST != 0,
        }
    }
}

// ============================================================================
// Host Versions
// ============================================================================

/// Version of the host runtime's internals
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HostVersion {
    pub major: u16,
    pub minor: u16,
    /// Host built without a global lock; drop requests travel through the
    /// eval breaker
    pub free_threaded: bool,
}

impl HostVersion {
    /// A regular (global-lock) host version
    pub const fn new(major: u16, minor: u16) -> Self {
        Self {
            major,
            minor,
            free_threaded: false,
        }
    }

    /// A free-threaded host version
    pub const fn free_threaded(major: u16, minor: u16) -> Self {
        Self {
            major,
            minor,
            free_threaded: true,
        }
    }

    /// What the checkpoint can rely on for this host
    ///
    /// - before 3.0 there are no cheap pending-work flags, so the counter
    ///   strategy is the only option
    /// - before 3.8 signals share the calls-to-do flag
    /// - from 3.8 signals have their own flag
    pub const fn capabilities(self) -> HostCapabilities {
        if self.major < 3 {
            return HostCapabilities {
                strategy: StrategyKind::Counter,
                flag_layout: FlagLayout::CallsOnly,
                drop_signal: DropSignal::DropRequestFlag,
            };
        }

        let flag_layout = if self.major == 3 && self.minor < 8 {
            FlagLayout::CallsOnly
        } else {
            FlagLayout::SignalsSplit
        };

        let drop_signal = if self.free_threaded {
            DropSignal::EvalBreaker
        } else {
            DropSignal::DropRequestFlag
        };

        HostCapabilities {
            strategy: StrategyKind::Flag,
            flag_layout,
            drop_signal,
        }
    }
}

/// Strategy parameters derived from a [`HostVersion`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostCapabilities {
    pub strategy: StrategyKind,
    pub flag_layout: FlagLayout,
    pub drop_signal: DropSignal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_hosts_use_counter() {
        let caps = HostVersion::new(2, 7).capabilities();
        assert_eq!(caps.strategy, StrategyKind::Counter);
    }

    #[test]
    fn test_flag_layout_split_at_3_8() {
        let caps = HostVersion::new(3, 7).capabilities();
        assert_eq!(caps.strategy, StrategyKind::Flag);
        assert_eq!(caps.flag_layout, FlagLayout::CallsOnly);

        let caps = HostVersion::new(3, 8).capabilities();
        assert_eq!(caps.flag_layout, FlagLayout::SignalsSplit);

        let caps = HostVersion::new(3, 12).capabilities();
        assert_eq!(caps.flag_layout, FlagLayout::SignalsSplit);
        assert_eq!(caps.drop_signal, DropSignal::DropRequestFlag);
    }

    #[test]
    fn test_free_threaded_uses_eval_breaker() {
        let caps = HostVersion::free_threaded(3, 9).capabilities();
        assert_eq!(caps.strategy, StrategyKind::Flag);
        assert_eq!(caps.drop_signal, DropSignal::EvalBreaker);
    }

    #[test]
    fn test_calls_only_ignores_signal_flag() {
        let flags = PendingFlags {
            signals_pending: true,
            ..PendingFlags::EMPTY
        };
        assert!(!flags.has_work(FlagLayout::CallsOnly));
        assert!(flags.has_work(FlagLayout::SignalsSplit));
    }

    #[test]
    fn test_eval_breaker_bits() {
        let flags = PendingFlags::from_eval_breaker(EVAL_DROP_REQUEST | EVAL_CALLS_TO_DO);
        assert!(flags.calls_to_do);
        assert!(!flags.signals_pending);
        assert!(flags.drop_requested(DropSignal::EvalBreaker));

        // The dedicated flag is not consulted in eval-breaker mode
        let flags = PendingFlags {
            lock_drop_requested: true,
            ..PendingFlags::EMPTY
        };
        assert!(!flags.drop_requested(DropSignal::EvalBreaker));
        assert!(flags.drop_requested(DropSignal::DropRequestFlag));
    }

    #[test]
    fn test_pending_signals_bit_is_not_a_drop_request() {
        let flags = PendingFlags::from_eval_breaker(EVAL_PENDING_SIGNALS);
        assert!(flags.signals_pending);
        assert!(!flags.drop_requested(DropSignal::EvalBreaker));
    }
}
