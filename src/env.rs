//! Env: one worker OS thread hosting one [`Scheduler`] and one idle ctx
//! (base spec §4).

use std::cell::{RefCell, UnsafeCell};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex as StdMutex, Weak};
use std::time::{Duration, Instant};

use spin::Mutex as SpinMutex;

use crate::ctx::{Ctx, CtxFlags, CtxState};
use crate::hooks::{EnvEvent, Hooks};
use crate::manager::Manager;
use crate::platform::{self, Registers};
use crate::scheduler::Scheduler;

/// Unique environment identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvId(u64);

impl EnvId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        EnvId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for EnvId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "env#{}", self.0)
    }
}

/// Coarse environment lifecycle state, published through [`EnvEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvState {
    Created,
    /// Running a real (non-idle) ctx.
    Busy,
    /// Running its idle ctx; nothing productive to do right now.
    Idle,
    /// Excluded from new scheduling decisions while the manager drains
    /// it (migration or teardown in progress).
    Blocked,
    /// Torn down; its OS thread has exited.
    Destroying,
}

/// Distinguishes "resuming the OS thread's native stack" from "resuming a
/// real ctx" at a switch site, without needing a placeholder [`Ctx`] for
/// the former.
pub(crate) enum Outgoing {
    Home,
    Ctx(Arc<Ctx>),
}

thread_local! {
    static CURRENT_ENV: RefCell<Option<Arc<Env>>> = const { RefCell::new(None) };
    static CURRENT_CTX: RefCell<Option<Arc<Ctx>>> = const { RefCell::new(None) };
}

/// The environment hosted by the calling OS thread, if any.
pub(crate) fn current_env() -> Option<Arc<Env>> {
    CURRENT_ENV.with(|c| c.borrow().clone())
}

/// The ctx currently running on the calling OS thread, if any.
pub(crate) fn current_ctx() -> Option<Arc<Ctx>> {
    CURRENT_CTX.with(|c| c.borrow().clone())
}

fn set_current_ctx(ctx: Option<Arc<Ctx>>) {
    CURRENT_CTX.with(|c| *c.borrow_mut() = ctx);
}

/// Yield control back to the hosting environment's scheduler. This is the
/// one primitive every suspension point in the crate — `this_co::yield_now`,
/// sync-primitive waits, `sleep_for` — ultimately calls (base spec §4.3).
///
/// # Panics
/// In debug builds, if called from a thread that is not hosting an
/// environment, or from an environment thread that is not currently
/// running a ctx (i.e. the native/home stack itself). Release builds
/// treat this as a no-op rather than invoking undefined behavior.
pub(crate) fn schedule_switch() {
    let Some(env) = current_env() else {
        debug_assert!(false, "schedule_switch called from a non-environment thread");
        return;
    };
    let Some(me) = current_ctx() else {
        debug_assert!(false, "schedule_switch called off a coroutine");
        return;
    };
    env.perform_switch(Outgoing::Ctx(me));
}

/// One worker thread: a scheduler, an idle ctx, and (optionally) one
/// shared stack region used by ctxs spawned with `shared_stack: true`.
pub struct Env {
    id: EnvId,
    pub(crate) scheduler: SpinMutex<Scheduler>,
    state: SpinMutex<EnvState>,
    home: UnsafeCell<Registers>,
    park_lock: StdMutex<()>,
    park_cv: Condvar,
    stop_requested: AtomicBool,
    last_schedule: SpinMutex<Instant>,
    manager: Weak<Manager>,
    pub(crate) hooks: Hooks<EnvEvent>,
    shared_stack: Option<SpinMutex<crate::stack::Stack>>,
    no_schedule_thread: bool,
    thread: StdMutex<Option<std::thread::JoinHandle<()>>>,
}

// SAFETY: `home` is only touched by this env's own OS thread, exclusively,
// never concurrently with itself (it is either running a ctx or parked).
unsafe impl Send for Env {}
unsafe impl Sync for Env {}

impl Env {
    pub(crate) fn new(
        idle: Arc<Ctx>,
        manager: Weak<Manager>,
        shared_stack: Option<crate::stack::Stack>,
        no_schedule_thread: bool,
    ) -> Arc<Self> {
        let env = Arc::new(Env {
            id: EnvId::next(),
            scheduler: SpinMutex::new(Scheduler::new(idle.clone())),
            state: SpinMutex::new(EnvState::Created),
            home: UnsafeCell::new(Registers::default()),
            park_lock: StdMutex::new(()),
            park_cv: Condvar::new(),
            stop_requested: AtomicBool::new(false),
            last_schedule: SpinMutex::new(Instant::now()),
            manager,
            hooks: Hooks::new(),
            shared_stack: shared_stack.map(SpinMutex::new),
            no_schedule_thread,
            thread: StdMutex::new(None),
        });
        idle.set_env(Some(Arc::downgrade(&env)));
        env
    }

    pub fn id(&self) -> EnvId {
        self.id
    }

    pub fn state(&self) -> EnvState {
        *self.state.lock()
    }

    fn set_state(&self, new: EnvState) {
        let mut state = self.state.lock();
        if *state != new {
            *state = new;
            self.hooks.publish(&EnvEvent::StateChanged(new));
        }
    }

    pub fn last_schedule(&self) -> Instant {
        *self.last_schedule.lock()
    }

    pub fn load(&self) -> usize {
        self.scheduler.lock().len()
    }

    pub fn is_no_schedule_thread(&self) -> bool {
        self.no_schedule_thread
    }

    pub(crate) fn has_shared_stack(&self) -> bool {
        self.shared_stack.is_some()
    }

    /// The shared region's top address and size, if this environment has
    /// one. The top address is fixed for the environment's whole
    /// lifetime, so every shared-stack ctx it ever hosts is seeded with
    /// the same `stack_top`.
    pub(crate) fn shared_stack_region(&self) -> Option<(*mut u8, usize)> {
        self.shared_stack
            .as_ref()
            .map(|s| {
                let stack = s.lock();
                (stack.top(), stack.size())
            })
    }

    /// Enroll a newly created (or migrated-in) ctx.
    pub(crate) fn enroll(self: &Arc<Self>, ctx: Arc<Ctx>) {
        ctx.set_env(Some(Arc::downgrade(self)));
        self.scheduler.lock().add(ctx);
        self.hooks.publish(&EnvEvent::CtxAdded);
        self.notify();
    }

    /// Remove a ctx this environment currently hosts (used by migration).
    /// Only valid for ctxs that are not `current`.
    pub(crate) fn evict(&self, id: crate::ctx::CtxId) -> Option<Arc<Ctx>> {
        let ctx = self.scheduler.lock().remove(id);
        if ctx.is_some() {
            self.hooks.publish(&EnvEvent::CtxRemoved);
        }
        ctx
    }

    pub(crate) fn change_priority(&self, old: u8, ctx: Arc<Ctx>) {
        self.scheduler.lock().change_priority(old, ctx);
    }

    pub(crate) fn sleep_ctx(&self, ctx: Arc<Ctx>, deadline: Instant) {
        self.scheduler.lock().sleep_until(ctx, deadline);
    }

    /// Wake any parked schedule loop so it re-checks its run queue.
    pub(crate) fn notify(&self) {
        let _guard = self.park_lock.lock().unwrap();
        self.park_cv.notify_all();
    }

    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.notify();
    }

    /// Spawn the OS thread that drives this environment's schedule loop.
    pub(crate) fn spawn_thread(self: &Arc<Self>, name: Option<String>) -> std::io::Result<()> {
        let env = self.clone();
        let mut builder = std::thread::Builder::new();
        if let Some(name) = name {
            builder = builder.name(name);
        }
        let handle = builder.spawn(move || env.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Run this environment's schedule loop on the *calling* OS thread
    /// instead of a manager-owned worker (base spec §6,
    /// `convert_this_thread_to_schedule_thread`). Does not return until
    /// the environment is torn down.
    pub(crate) fn run_inline(self: &Arc<Self>) {
        self.clone().run();
    }

    fn run(self: Arc<Self>) {
        CURRENT_ENV.with(|c| *c.borrow_mut() = Some(self.clone()));
        self.perform_switch(Outgoing::Home);
        self.set_state(EnvState::Destroying);
        CURRENT_ENV.with(|c| *c.borrow_mut() = None);
    }

    /// The core step: decide what runs next and perform (at most) one
    /// register swap. Everything after the `platform::switch` call below
    /// only touches the outgoing ctx itself, never `self` — by the time
    /// control returns there, `self` may no longer be this ctx's host if
    /// it was migrated while suspended (base spec §9).
    pub(crate) fn perform_switch(self: &Arc<Self>, outgoing: Outgoing) {
        match &outgoing {
            Outgoing::Ctx(ctx) if ctx.state() == CtxState::Finished => {
                if let Some(manager) = self.manager.upgrade() {
                    manager.on_ctx_finished(ctx.clone());
                }
            }
            Outgoing::Ctx(ctx) => {
                self.scheduler.lock().add(ctx.clone());
            }
            Outgoing::Home => {}
        }

        loop {
            if self.stop_requested.load(Ordering::Acquire) {
                self.switch_to_home(&outgoing);
                return;
            }

            let now = Instant::now();
            let expired = self.scheduler.lock().expire_sleepers(now);
            for ctx in expired {
                ctx.remove_flags(CtxFlags::WAITING);
            }

            let (empty, deadline) = {
                let sched = self.scheduler.lock();
                (sched.is_empty(), sched.next_deadline())
            };
            if empty {
                self.set_state(EnvState::Idle);
                self.park(deadline);
                continue;
            }

            let next = self.scheduler.lock().choose();
            let next_is_idle = {
                let sched = self.scheduler.lock();
                Arc::ptr_eq(&next, &sched.idle())
            };
            self.set_state(if next_is_idle {
                EnvState::Idle
            } else {
                EnvState::Busy
            });
            *self.last_schedule.lock() = now;

            if is_same(&outgoing, &next) {
                return;
            }

            next.insert_flags(CtxFlags::SWITCHING);
            if let Outgoing::Ctx(ref me) = outgoing {
                me.insert_flags(CtxFlags::SWITCHING);
            }
            set_current_ctx(Some(next.clone()));

            let next_ptr = next.regs.get();
            let curr_ptr = match &outgoing {
                Outgoing::Home => self.home.get(),
                Outgoing::Ctx(me) => me.regs.get(),
            };

            // Shared-stack ctxs don't own their stack memory outright;
            // the live region is saved out / restored in around whoever
            // is about to stop / start using it (base spec §3).
            if let Outgoing::Ctx(ref me) = outgoing {
                if me.flags().contains(CtxFlags::SHARED_STACK) {
                    if let crate::ctx::StackSlot::Shared { save } = &mut *me.stack.lock() {
                        self.shared_stack_save(save);
                    }
                }
            }
            if next.flags().contains(CtxFlags::SHARED_STACK) {
                if let crate::ctx::StackSlot::Shared { save } = &*next.stack.lock() {
                    self.shared_stack_restore(save);
                }
            }

            // SAFETY: both participants are pinned by SWITCHING for the
            // duration of the swap; `next_ptr` was either seeded by
            // `init_stack_with_arg` or last saved by a prior call here.
            unsafe { platform::switch(curr_ptr, next_ptr) };

            if let Outgoing::Ctx(ref me) = outgoing {
                me.remove_flags(CtxFlags::SWITCHING);
            }
            return;
        }
    }

    fn switch_to_home(self: &Arc<Self>, outgoing: &Outgoing) {
        let Outgoing::Ctx(me) = outgoing else {
            return;
        };
        me.insert_flags(CtxFlags::SWITCHING);
        // SAFETY: the environment is being torn down; the manager has
        // already ensured no other ctx of this env is runnable.
        unsafe { platform::switch(me.regs.get(), self.home.get()) };
    }

    fn park(&self, deadline: Option<Instant>) {
        let guard = self.park_lock.lock().unwrap();
        let wait = match deadline {
            Some(d) => d.saturating_duration_since(Instant::now()).min(Duration::from_millis(50)),
            None => Duration::from_millis(50),
        };
        let _ = self.park_cv.wait_timeout(guard, wait);
    }

    /// Copy a ctx's shared-stack save buffer into (or out of) this
    /// environment's real shared stack region. Called by the manager
    /// right before enrolling/evicting a `SHARED_STACK` ctx when it is
    /// about to become — or stop being — the one occupying the region.
    pub(crate) fn shared_stack_restore(&self, save: &[u8]) {
        if let Some(region) = &self.shared_stack {
            let region = region.lock();
            let len = save.len().min(region.size());
            unsafe {
                std::ptr::copy_nonoverlapping(save.as_ptr(), region.base(), len);
            }
        }
    }

    pub(crate) fn shared_stack_save(&self, save: &mut Vec<u8>) {
        if let Some(region) = &self.shared_stack {
            let region = region.lock();
            save.resize(region.size(), 0);
            unsafe {
                std::ptr::copy_nonoverlapping(region.base(), save.as_mut_ptr(), region.size());
            }
        }
    }
}

fn is_same(outgoing: &Outgoing, next: &Arc<Ctx>) -> bool {
    match outgoing {
        Outgoing::Ctx(me) => Arc::ptr_eq(me, next),
        Outgoing::Home => false,
    }
}
