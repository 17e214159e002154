//! weft — a stackful coroutine runtime.
//!
//! A small number of OS threads ("environments") each run a priority
//! scheduler over a pool of user-space execution contexts ("ctxs"),
//! cooperatively switched via a register-level context swap instead of
//! OS preemption. See [`spawn`] to create a ctx and the [`sync`] module
//! for the primitives that block a ctx without blocking its host
//! environment's thread.
//!
//! ```no_run
//! weft::init(weft::ManagerConfig::default()).unwrap();
//! let handle = weft::spawn(weft::CoroutineConfig::default(), || {
//!     weft::this_co::yield_now();
//!     42
//! }).unwrap();
//! let ret = handle.join();
//! assert_eq!(ret.and_then(|b| b.downcast::<i32>().ok()), Some(Box::new(42)));
//! weft::uninit();
//! ```

mod config;
mod ctx;
mod env;
mod error;
mod hooks;
mod manager;
mod platform;
mod scheduler;
mod stack;
pub mod sync;
pub mod this_co;
mod trampoline;

use std::any::Any;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub use config::{CoroutineConfig, ManagerConfig};
pub use ctx::{CtxId, CtxState};
pub use env::{EnvId, EnvState};
pub use error::{Result, RuntimeError};
pub use scheduler::PRIORITY_LEVELS;

use ctx::Ctx;
use manager::Manager;

static MANAGER: OnceLock<Arc<Manager>> = OnceLock::new();

/// Start the runtime: allocate the environment pool and background
/// maintenance thread described by `config`. Must be called once before
/// [`spawn`] or [`convert_this_thread_to_schedule_thread`].
pub fn init(config: ManagerConfig) -> Result<()> {
    let manager = Manager::new(config)?;
    MANAGER
        .set(manager)
        .map_err(|_| RuntimeError::AlreadyInitialized)
}

/// Stop every environment and join the maintenance thread. Idempotent;
/// a no-op if `init` was never called or `uninit` already ran.
pub fn uninit() {
    if let Some(manager) = MANAGER.get() {
        manager.shutdown();
    }
}

fn manager() -> Arc<Manager> {
    MANAGER
        .get()
        .expect("weft::init() must be called before using the runtime")
        .clone()
}

/// Spawn a new ctx running `body` to completion, placed onto whichever
/// environment `cfg` selects.
pub fn spawn<F, R>(cfg: CoroutineConfig, body: F) -> Result<CtxHandle>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let boxed: Box<dyn FnOnce() -> Box<dyn Any + Send> + Send> =
        Box::new(move || Box::new(body()) as Box<dyn Any + Send>);
    let ctx = manager().spawn(cfg, boxed)?;
    Ok(CtxHandle { ctx })
}

/// Run the calling OS thread as an additional environment for the
/// lifetime of the process, rather than spawning a manager-owned worker
/// thread for it. Does not return until the runtime shuts down.
pub fn convert_this_thread_to_schedule_thread() -> Result<()> {
    manager().convert_this_thread_to_schedule_thread()
}

/// A handle to a spawned ctx, returned by [`spawn`].
///
/// Dropping a handle without calling [`CtxHandle::join`] or
/// [`CtxHandle::detach`] leaves the ctx attached but un-joinable by
/// anyone — it will run to completion and then sit in the manager's
/// registry forever. Call `detach` if you don't intend to join.
pub struct CtxHandle {
    ctx: Arc<Ctx>,
}

impl CtxHandle {
    pub fn id(&self) -> CtxId {
        self.ctx.id()
    }

    pub fn name(&self) -> Option<&str> {
        self.ctx.name()
    }

    pub fn priority(&self) -> u8 {
        self.ctx.priority()
    }

    /// Change the ctx's scheduling priority, even while it's blocked.
    pub fn set_priority(&self, priority: u8) {
        let old = self.ctx.set_priority_raw(priority);
        if let Some(env) = self.ctx.env() {
            env.change_priority(old, self.ctx.clone());
        }
    }

    pub fn state(&self) -> CtxState {
        self.ctx.state()
    }

    /// Block the calling ctx until this one finishes, returning its
    /// result (or panic payload — see [`trampoline::spawn_entry`]).
    pub fn join(self) -> Option<Box<dyn Any + Send>> {
        manager().join(&self.ctx, None)
    }

    /// Like [`CtxHandle::join`], but gives up after `timeout`, returning
    /// `None` either way (a finished-but-not-yet-observed ctx can still
    /// be joined again afterwards).
    pub fn join_timeout(&self, timeout: Duration) -> Option<Box<dyn Any + Send>> {
        manager().join(&self.ctx, Some(timeout))
    }

    /// Detach the ctx: no one can join it afterwards, and the runtime
    /// reclaims it on its own once it finishes.
    pub fn detach(self) {
        manager().detach(&self.ctx);
    }

    /// Force-remove this ctx from the runtime right away. If it is
    /// currently `LOCKED` or mid-switch, the request is parked and
    /// retried from the manager's maintenance loop; this call still
    /// returns [`RuntimeError::NotDestroyable`] immediately in that case.
    pub fn destroy(self) -> Result<()> {
        manager().destroy_ctx(&self.ctx)
    }
}

impl std::fmt::Debug for CtxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CtxHandle").field("id", &self.id()).finish()
    }
}
