//! Error types for the coroutine runtime.
//!
//! Precondition violations such as calling `schedule_switch` off a
//! coroutine are not represented here — they are caller bugs, reported
//! via `debug_assert!` in debug builds and left unchecked in release. A
//! semaphore release past its cap blocks the releasing ctx rather than
//! erroring. Destroying a `LOCKED` or `SWITCHING` ctx is a legitimate,
//! transient condition rather than a bug: it's reported via
//! [`RuntimeError::NotDestroyable`], and the manager's maintenance loop
//! keeps retrying the request until it succeeds.

use thiserror::Error;

/// Errors that can surface from the manager-level API.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The platform failed to provide a stack-sized memory region.
    #[error("failed to allocate a {size}-byte stack: {reason}")]
    StackAllocation {
        /// Requested stack size in bytes.
        size: usize,
        /// Platform-reported reason.
        reason: &'static str,
    },

    /// Spawning the OS thread backing a new environment failed.
    #[error("failed to spawn environment worker thread: {0}")]
    EnvSpawn(std::io::Error),

    /// The manager has already been torn down via `uninit()`.
    #[error("runtime manager has already been shut down")]
    ManagerShutdown,

    /// `init()` was called a second time without an intervening
    /// `uninit()`.
    #[error("weft::init() was already called")]
    AlreadyInitialized,

    /// An operation that requires coroutine context was called from a
    /// thread that is not an environment's schedule loop.
    #[error("operation requires coroutine context, but the calling thread is not an environment")]
    NotACoroutine,

    /// `destroy_ctx` was asked to destroy a ctx that is `LOCKED` or
    /// mid-switch; the caller should retry later.
    #[error("ctx {0:?} cannot be destroyed right now (locked or switching)")]
    NotDestroyable(crate::ctx::CtxId),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, RuntimeError>;
