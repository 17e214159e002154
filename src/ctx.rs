//! Ctx: a single schedulable execution context (base spec §3).

use std::any::Any;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use spin::Mutex;

use crate::env::Env;
use crate::hooks::{CtxEvent, Hooks};
use crate::platform::{self, Registers};
use crate::scheduler::PRIORITY_LEVELS;
use crate::stack::Stack;

/// Unique ctx identifier, stable for the ctx's whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CtxId(u64);

impl CtxId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CtxId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for CtxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// A ctx's position in its lifecycle. Transitions are monotone toward
/// `Finished`: once a ctx is `Finished`, [`Ctx::set_state`] is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtxState {
    /// Allocated, not yet run.
    Created,
    /// Currently executing on some environment's OS thread.
    Running,
    /// Not running; may be runnable (just not chosen yet) or blocked
    /// (`WAITING` set) — see [`Ctx::is_schedulable`].
    Suspended,
    /// Entry thunk returned; terminal.
    Finished,
}

bitflags! {
    /// Ctx flags (base spec §3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CtxFlags: u32 {
        /// Blocked on a sync primitive or `wait_ctx`; skipped by `choose`.
        const WAITING             = 1 << 0;
        /// Cannot be destroyed (see [`Ctx::is_destroyable`]).
        const LOCKED              = 1 << 1;
        /// Pinned to its current environment; never migrated.
        const BIND                = 1 << 2;
        /// Uses its environment's shared stack rather than an exclusive one.
        const SHARED_STACK        = 1 << 3;
        /// Mid register-swap; forbids migration and destruction.
        const SWITCHING           = 1 << 4;
        /// This is an environment's idle ctx.
        const IDLE                = 1 << 5;
        /// No one will `join` this ctx; the runtime reclaims it alone.
        const DETACHED            = 1 << 6;
        /// Set on environments created via
        /// `convert_this_thread_to_schedule_thread`, whose OS thread is
        /// not owned by the manager's thread pool.
        const NO_SCHEDULE_THREAD  = 1 << 7;
    }
}

/// Where a ctx's stack lives.
pub(crate) enum StackSlot {
    /// An exclusive allocation, owned outright.
    Exclusive(Stack),
    /// The hosting environment's shared stack; `save` holds this ctx's
    /// private copy of the region while some other ctx is using it.
    Shared { save: Vec<u8> },
}

/// A one-shot user entry thunk, invoked the first time a ctx runs.
pub(crate) type Entry = Box<dyn FnOnce() -> Box<dyn Any + Send> + Send>;

/// A schedulable execution context: saved registers, a stack, lifecycle
/// state, flags, priority, a type-erased return slot, and event hooks.
pub struct Ctx {
    id: CtxId,
    name: Option<String>,
    pub(crate) regs: UnsafeCell<Registers>,
    pub(crate) stack: Mutex<StackSlot>,
    state: Mutex<CtxState>,
    flags: Mutex<CtxFlags>,
    priority: AtomicU8,
    env: Mutex<Option<Weak<Env>>>,
    entry: Mutex<Option<Entry>>,
    ret: Mutex<Option<Box<dyn Any + Send>>>,
    pub(crate) hooks: Hooks<CtxEvent>,
}

// SAFETY: `regs` is only ever touched by the environment that currently
// hosts this ctx, exclusively, under the `SWITCHING` flag; every other
// field has its own lock.
unsafe impl Send for Ctx {}
unsafe impl Sync for Ctx {}

impl Ctx {
    /// Build a brand-new, not-yet-runnable ctx. Used by the manager for
    /// user-spawned ctxs and by each environment for its idle ctx.
    /// `stack_top` is the real, absolute address execution will actually
    /// use: the exclusive allocation's own top, or — for a `Shared`
    /// stack — the hosting environment's shared region top, which is
    /// the same address for every ctx that ever runs on that region.
    pub(crate) fn new(
        name: Option<String>,
        priority: u8,
        stack: StackSlot,
        stack_top: *mut u8,
        flags: CtxFlags,
        trampoline: unsafe extern "C" fn() -> !,
        entry: Option<Entry>,
    ) -> Arc<Self> {
        let ctx = Arc::new(Ctx {
            id: CtxId::next(),
            name,
            regs: UnsafeCell::new(Registers::default()),
            stack: Mutex::new(stack),
            state: Mutex::new(CtxState::Created),
            flags: Mutex::new(flags),
            priority: AtomicU8::new(priority.min(PRIORITY_LEVELS as u8 - 1)),
            env: Mutex::new(None),
            entry: Mutex::new(entry),
            ret: Mutex::new(None),
            hooks: Hooks::new(),
        });
        let arg = Arc::as_ptr(&ctx) as *mut ();
        // SAFETY: stack_top is the high end of a region owned by `ctx`
        // (directly, or via the env's shared region once it runs); arg
        // is a pointer this same Arc keeps alive past this call.
        let regs = unsafe { platform::init_stack_with_arg(stack_top, trampoline, arg) };
        unsafe { *ctx.regs.get() = regs };
        ctx
    }

    pub fn id(&self) -> CtxId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn state(&self) -> CtxState {
        *self.state.lock()
    }

    /// Set the lifecycle state. A no-op once `Finished` (base spec
    /// invariant 1).
    pub(crate) fn set_state(&self, new: CtxState) {
        let mut state = self.state.lock();
        if *state == CtxState::Finished {
            return;
        }
        *state = new;
        self.hooks.publish(&CtxEvent::StateChanged(new));
    }

    pub fn flags(&self) -> CtxFlags {
        *self.flags.lock()
    }

    pub(crate) fn insert_flags(&self, flags: CtxFlags) {
        self.flags.lock().insert(flags);
    }

    pub(crate) fn remove_flags(&self, flags: CtxFlags) {
        self.flags.lock().remove(flags);
    }

    pub(crate) fn set_locked(&self, locked: bool) {
        let mut flags = self.flags.lock();
        if locked {
            flags.insert(CtxFlags::LOCKED);
        } else {
            flags.remove(CtxFlags::LOCKED);
        }
        drop(flags);
        self.hooks.publish(&CtxEvent::LockChanged { locked });
    }

    pub fn priority(&self) -> u8 {
        self.priority.load(Ordering::Relaxed)
    }

    /// Clamp and store a new priority, publishing `PriorityChanged`.
    /// Legal even while `WAITING` (base spec §9 open question): the next
    /// scheduler re-enqueue places the ctx correctly.
    pub(crate) fn set_priority_raw(&self, new: u8) -> u8 {
        let new = new.min(PRIORITY_LEVELS as u8 - 1);
        let old = self.priority.swap(new, Ordering::Relaxed);
        if old != new {
            self.hooks
                .publish(&CtxEvent::PriorityChanged { old, new });
        }
        old
    }

    pub(crate) fn env(&self) -> Option<Arc<Env>> {
        self.env.lock().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_env(&self, env: Option<Weak<Env>>) {
        *self.env.lock() = env;
        self.hooks.publish(&CtxEvent::EnvSet);
    }

    /// A ctx is schedulable iff it hasn't finished and isn't blocked.
    pub fn is_schedulable(&self) -> bool {
        let state = *self.state.lock();
        let flags = *self.flags.lock();
        state != CtxState::Finished && !flags.contains(CtxFlags::WAITING)
    }

    /// A ctx is movable iff it isn't running, pinned, shared-stack, or
    /// mid-switch (base spec §3 invariant).
    pub fn is_movable(&self) -> bool {
        let state = *self.state.lock();
        let flags = *self.flags.lock();
        state != CtxState::Running
            && !flags.intersects(CtxFlags::BIND | CtxFlags::SHARED_STACK | CtxFlags::SWITCHING)
    }

    /// A ctx is destroyable iff it isn't `LOCKED`.
    pub fn is_destroyable(&self) -> bool {
        !self.flags.lock().contains(CtxFlags::LOCKED)
    }

    /// For a freshly created `SHARED_STACK` ctx: capture whatever its
    /// host environment's shared region currently holds (the initial
    /// trampoline frame this ctx's own construction just wrote into it)
    /// into this ctx's save buffer, so its first real switch-in — which
    /// unconditionally restores the save buffer over the region — is a
    /// faithful no-op rather than clobbering that frame with zeros.
    pub(crate) fn snapshot_shared_stack(&self, env: &crate::env::Env) {
        if let StackSlot::Shared { save } = &mut *self.stack.lock() {
            env.shared_stack_save(save);
        }
    }

    pub(crate) fn take_entry(&self) -> Option<Entry> {
        self.entry.lock().take()
    }

    pub(crate) fn store_ret(&self, ret: Box<dyn Any + Send>) {
        *self.ret.lock() = Some(ret);
    }

    pub(crate) fn take_ret(&self) -> Option<Box<dyn Any + Send>> {
        self.ret.lock().take()
    }
}

impl std::fmt::Debug for Ctx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ctx")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("flags", &self.flags())
            .field("priority", &self.priority())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn noop_trampoline() -> ! {
        unreachable!("test ctxs are never actually switched into")
    }

    fn make_ctx(priority: u8) -> Arc<Ctx> {
        let stack = Stack::new(crate::config::DEFAULT_STACK_SIZE).unwrap();
        let top = stack.top();
        Ctx::new(
            None,
            priority,
            StackSlot::Exclusive(stack),
            top,
            CtxFlags::empty(),
            noop_trampoline,
            None,
        )
    }

    #[test]
    fn finished_state_is_sticky() {
        let ctx = make_ctx(0);
        ctx.set_state(CtxState::Finished);
        ctx.set_state(CtxState::Suspended);
        assert_eq!(ctx.state(), CtxState::Finished);
    }

    #[test]
    fn priority_is_clamped() {
        let ctx = make_ctx(250);
        assert_eq!(ctx.priority(), PRIORITY_LEVELS as u8 - 1);
    }

    #[test]
    fn schedulable_iff_alive_and_not_waiting() {
        let ctx = make_ctx(0);
        assert!(ctx.is_schedulable());
        ctx.insert_flags(CtxFlags::WAITING);
        assert!(!ctx.is_schedulable());
        ctx.remove_flags(CtxFlags::WAITING);
        ctx.set_state(CtxState::Finished);
        assert!(!ctx.is_schedulable());
    }

    #[test]
    fn movable_excludes_bind_shared_stack_switching() {
        let ctx = make_ctx(0);
        assert!(ctx.is_movable());
        ctx.insert_flags(CtxFlags::BIND);
        assert!(!ctx.is_movable());
    }

    #[test]
    fn destroyable_iff_not_locked() {
        let ctx = make_ctx(0);
        assert!(ctx.is_destroyable());
        ctx.set_locked(true);
        assert!(!ctx.is_destroyable());
        ctx.set_locked(false);
        assert!(ctx.is_destroyable());
    }
}
