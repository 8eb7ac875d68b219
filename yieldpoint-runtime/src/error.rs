//! Error types for Yieldpoint runtime

use std::sync::Arc;
use thiserror::Error;

/// Alias for `Result<T, Error>`
pub type Result<T> = std::result::Result<T, Error>;

/// Yieldpoint setup and host errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Check interval must be a positive integer
    #[error("invalid check interval: {0} (must be positive)")]
    InvalidInterval(u32),

    /// No attached thread with this ID
    #[error("unknown thread ID: {0}")]
    UnknownThread(u64),

    /// The target thread already has an undelivered async exception
    #[error("thread {0} already has a pending async exception")]
    AsyncExcPending(u64),

    /// Thread tried to give up a lock it does not hold
    #[error("execution lock not held by thread {0}")]
    LockNotHeld(u64),
}

/// An exception value as seen by the checkpoint
///
/// Cloning is cheap; the kind and message are shared.
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
#[error("{kind}: {message}")]
pub struct ExceptionValue {
    kind: Arc<str>,
    message: Arc<str>,
}

impl ExceptionValue {
    /// Create an exception of the given kind
    pub fn new(kind: impl Into<Arc<str>>, message: impl Into<Arc<str>>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Exception kind, e.g. `KeyboardInterrupt`
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The host's pending-call dispatcher reported a failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("pending call failed: {reason}")]
pub struct DispatchFailure {
    pub reason: String,
}

impl DispatchFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Why a checkpoint asks its caller to unwind
///
/// In both cases the thread's active error is set; the caller must stop its
/// current operation and surface it. Neither case is retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Propagate {
    /// A pending call failed and left an error active on the thread
    #[error(transparent)]
    Dispatch(#[from] DispatchFailure),

    /// An async exception was claimed and installed as the active error
    #[error("async exception delivered: {0}")]
    AsyncException(ExceptionValue),
}
