//! Coroutine-aware synchronization primitives (base spec §5).
//!
//! Every primitive in this module blocks the *ctx*, not the OS thread:
//! waiting parks by setting `WAITING` and yielding to the environment's
//! scheduler (see [`wait::WaitQueue`]), so one environment thread can
//! keep running other ctxs while some of its ctxs are blocked.

mod channel;
mod condvar;
mod mutex;
mod semaphore;
pub(crate) mod wait;

pub use channel::{Channel, Rendezvous};
pub use condvar::Condvar;
pub use mutex::{Mutex, MutexGuard};
pub use semaphore::Semaphore;
