//! Manager: owns every environment and every ctx, and runs the background
//! maintenance sweep (base spec §6).

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock, Weak};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::config::{CoroutineConfig, ManagerConfig};
use crate::ctx::{Ctx, CtxFlags, CtxId, CtxState, StackSlot};
use crate::env::{self, Env};
use crate::error::{Result, RuntimeError};
use crate::stack::Stack;
use crate::trampoline::{ctx_trampoline, spawn_entry};

/// Owns the environment pool and the canonical registry of live ctxs.
/// Every ctx a caller sees a handle to is kept alive here until it
/// finishes *and* is either detached or joined.
pub struct Manager {
    config: ManagerConfig,
    envs: RwLock<Vec<Arc<Env>>>,
    ctxs: RwLock<HashMap<CtxId, Arc<Ctx>>>,
    shutting_down: AtomicBool,
    maintenance: StdMutex<Option<std::thread::JoinHandle<()>>>,
    pending_destroys: StdMutex<Vec<CtxId>>,
}

impl Manager {
    pub fn new(config: ManagerConfig) -> Result<Arc<Self>> {
        let manager = Arc::new(Manager {
            config,
            envs: RwLock::new(Vec::new()),
            ctxs: RwLock::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            maintenance: StdMutex::new(None),
            pending_destroys: StdMutex::new(Vec::new()),
        });

        let initial = manager.config.worker_threads.max(manager.config.min_workers).max(1);
        for _ in 0..initial {
            manager.spawn_env(false)?;
        }

        let weak = Arc::downgrade(&manager);
        let interval = manager.config.rebalance_interval;
        let handle = std::thread::Builder::new()
            .name("weft-maintenance".into())
            .spawn(move || maintenance_loop(weak, interval))
            .map_err(RuntimeError::EnvSpawn)?;
        *manager.maintenance.lock().unwrap() = Some(handle);

        Ok(manager)
    }

    fn spawn_env(self: &Arc<Self>, no_schedule_thread: bool) -> Result<Arc<Env>> {
        let idle_stack = Stack::new(crate::config::DEFAULT_STACK_SIZE)?;
        let idle_top = idle_stack.top();
        let idle = Ctx::new(
            Some("idle".into()),
            0,
            StackSlot::Exclusive(idle_stack),
            idle_top,
            CtxFlags::IDLE,
            ctx_trampoline,
            Some(spawn_entry(Box::new(idle_body))),
        );
        let shared_stack = self
            .config
            .shared_stack_size
            .map(Stack::new)
            .transpose()?;
        let env = Env::new(idle.clone(), Arc::downgrade(self), shared_stack, no_schedule_thread);
        if !no_schedule_thread {
            env.spawn_thread(Some(format!("weft-env-{}", env.id())))
                .map_err(RuntimeError::EnvSpawn)?;
        }
        self.envs.write().unwrap().push(env.clone());
        debug!(target: "weft::manager", "environment {} created", env.id());
        Ok(env)
    }

    /// Create and enroll a new ctx; does not start running it (that
    /// happens the first time its host environment's scheduler picks it).
    pub fn spawn(
        self: &Arc<Self>,
        cfg: CoroutineConfig,
        body: Box<dyn FnOnce() -> Box<dyn Any + Send> + Send>,
    ) -> Result<Arc<Ctx>> {
        let env = self.pick_env(&cfg)?;
        let mut flags = CtxFlags::empty();
        if cfg.bind_env {
            flags.insert(CtxFlags::BIND);
        }

        let (stack, stack_top) = if cfg.shared_stack && env.has_shared_stack() {
            flags.insert(CtxFlags::SHARED_STACK);
            let (top, size) = env.shared_stack_region().expect("has_shared_stack checked above");
            (StackSlot::Shared { save: vec![0u8; size] }, top)
        } else {
            let stack = Stack::new(cfg.stack_size)?;
            let top = stack.top();
            (StackSlot::Exclusive(stack), top)
        };

        let ctx = Ctx::new(
            cfg.name.clone(),
            cfg.priority,
            stack,
            stack_top,
            flags,
            ctx_trampoline,
            Some(spawn_entry(body)),
        );
        if ctx.flags().contains(CtxFlags::SHARED_STACK) {
            ctx.snapshot_shared_stack(&env);
        }
        self.ctxs.write().unwrap().insert(ctx.id(), ctx.clone());
        env.enroll(ctx.clone());
        info!(target: "weft::manager", "ctx {} spawned onto {}", ctx.id(), env.id());
        Ok(ctx)
    }

    fn pick_env(self: &Arc<Self>, cfg: &CoroutineConfig) -> Result<Arc<Env>> {
        if cfg.bind_env {
            if let Some(env) = env::current_env() {
                return Ok(env);
            }
        }
        let envs = self.envs.read().unwrap();
        envs.iter()
            .min_by_key(|e| e.load())
            .cloned()
            .ok_or(RuntimeError::ManagerShutdown)
    }

    /// Block the calling ctx until `target` finishes, or `timeout` (if
    /// given) elapses first.
    pub fn join(&self, target: &Arc<Ctx>, timeout: Option<Duration>) -> Option<Box<dyn Any + Send>> {
        crate::sync::wait::wait_for(target, timeout)
    }

    /// Mark a ctx so the runtime reclaims it alone once it finishes,
    /// rather than waiting for a `join`.
    pub fn detach(&self, ctx: &Arc<Ctx>) {
        ctx.insert_flags(CtxFlags::DETACHED);
        if ctx.state() == CtxState::Finished {
            self.on_ctx_finished(ctx.clone());
        }
    }

    /// Called by an environment right after a ctx transitions to
    /// `Finished` (base spec §4.2 step 2).
    pub(crate) fn on_ctx_finished(&self, ctx: Arc<Ctx>) {
        trace!(target: "weft::manager", "ctx {} finished", ctx.id());
        if ctx.flags().contains(CtxFlags::DETACHED) {
            self.ctxs.write().unwrap().remove(&ctx.id());
        }
    }

    /// Remove `ctx` from the runtime right away if `can_destroy()` holds
    /// (not `LOCKED`, not `SWITCHING`). Otherwise the request is parked
    /// and retried from the maintenance loop until it succeeds; this
    /// call still reports [`RuntimeError::NotDestroyable`] immediately
    /// so the caller knows it hasn't happened yet.
    pub fn destroy_ctx(&self, ctx: &Arc<Ctx>) -> Result<()> {
        if self.try_destroy(ctx) {
            Ok(())
        } else {
            self.pending_destroys.lock().unwrap().push(ctx.id());
            Err(RuntimeError::NotDestroyable(ctx.id()))
        }
    }

    fn try_destroy(&self, ctx: &Arc<Ctx>) -> bool {
        if !ctx.is_destroyable() || ctx.flags().contains(CtxFlags::SWITCHING) {
            return false;
        }
        if let Some(env) = ctx.env() {
            env.evict(ctx.id());
        }
        self.ctxs.write().unwrap().remove(&ctx.id());
        info!(target: "weft::manager", "ctx {} destroyed", ctx.id());
        true
    }

    fn retry_pending_destroys(&self) {
        let pending = std::mem::take(&mut *self.pending_destroys.lock().unwrap());
        let mut still_pending = Vec::new();
        for id in pending {
            let Some(ctx) = self.ctxs.read().unwrap().get(&id).cloned() else {
                continue; // already gone (reclaimed as finished+detached, etc.)
            };
            if !self.try_destroy(&ctx) {
                still_pending.push(id);
            }
        }
        *self.pending_destroys.lock().unwrap() = still_pending;
    }

    /// Run the current OS thread as an additional environment, with no
    /// manager-owned thread behind it (base spec §6). Returns once the
    /// environment is torn down (normally only at process shutdown).
    pub fn convert_this_thread_to_schedule_thread(self: &Arc<Self>) -> Result<()> {
        if env::current_env().is_some() {
            return Err(RuntimeError::NotACoroutine);
        }
        let env = self.spawn_env(true)?;
        env.run_inline();
        Ok(())
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn env_count(&self) -> usize {
        self.envs.read().unwrap().len()
    }

    pub fn shutdown(self: &Arc<Self>) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for env in self.envs.read().unwrap().iter() {
            env.request_stop();
        }
        if let Some(handle) = self.maintenance.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// One maintenance pass: reclaim stray finished+detached ctxs,
    /// migrate at most one movable ctx to rebalance load, and retire
    /// idle environments above `min_workers`.
    fn maintenance_tick(self: &Arc<Self>) {
        self.reclaim_stray();
        self.retry_pending_destroys();
        self.rebalance_once();
        self.retire_idle_envs();
    }

    fn reclaim_stray(&self) {
        let mut ctxs = self.ctxs.write().unwrap();
        ctxs.retain(|_, ctx| {
            !(ctx.state() == CtxState::Finished && ctx.flags().contains(CtxFlags::DETACHED))
        });
    }

    fn rebalance_once(self: &Arc<Self>) {
        let envs = self.envs.read().unwrap().clone();
        if envs.len() < 2 {
            return;
        }
        let Some(busiest) = envs.iter().max_by_key(|e| e.load()) else {
            return;
        };
        let Some(quietest) = envs.iter().min_by_key(|e| e.load()) else {
            return;
        };
        if Arc::ptr_eq(busiest, quietest) {
            return;
        }
        let gap = busiest.load().saturating_sub(quietest.load());
        if gap < self.config.rebalance_threshold {
            return;
        }
        if let Some(victim) = self.find_movable(busiest) {
            let id = victim.id();
            if let Some(ctx) = busiest.evict(id) {
                quietest.enroll(ctx);
                warn!(
                    target: "weft::manager",
                    "migrated {} from {} to {} (gap {})",
                    id, busiest.id(), quietest.id(), gap
                );
            }
        }
    }

    fn find_movable(&self, env: &Arc<Env>) -> Option<Arc<Ctx>> {
        // Scanning the registry is O(total ctxs), acceptable for a
        // once-per-interval rebalance pass. A per-env movable list would
        // make this O(1) at the cost of extra bookkeeping on every
        // enroll/evict.
        self.ctxs
            .read()
            .unwrap()
            .values()
            .find(|ctx| ctx.is_movable() && ctx.env().is_some_and(|e| Arc::ptr_eq(&e, env)))
            .cloned()
    }

    fn retire_idle_envs(self: &Arc<Self>) {
        let floor = self.config.min_workers.max(1);
        let mut envs = self.envs.write().unwrap();
        if envs.len() <= floor {
            return;
        }
        let now = Instant::now();
        let mut retained = envs.len();
        envs.retain(|env| {
            if retained <= floor {
                return true;
            }
            let idle_for = now.saturating_duration_since(env.last_schedule());
            let retire = !env.is_no_schedule_thread() && env.load() == 0 && idle_for > self.config.max_idle;
            if retire {
                info!(target: "weft::manager", "retiring idle environment {}", env.id());
                env.request_stop();
                retained -= 1;
            }
            !retire
        });
    }
}

fn maintenance_loop(manager: Weak<Manager>, interval: Duration) {
    loop {
        std::thread::sleep(interval);
        let Some(manager) = manager.upgrade() else {
            return;
        };
        if manager.shutting_down.load(Ordering::Acquire) {
            return;
        }
        manager.maintenance_tick();
    }
}

fn idle_body() -> Box<dyn Any + Send> {
    loop {
        crate::this_co::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn noop_trampoline() -> ! {
        unreachable!("test ctxs are never actually switched into")
    }

    fn make_ctx() -> Arc<Ctx> {
        let stack = Stack::new(crate::config::DEFAULT_STACK_SIZE).unwrap();
        let top = stack.top();
        Ctx::new(
            None,
            0,
            StackSlot::Exclusive(stack),
            top,
            CtxFlags::empty(),
            noop_trampoline,
            None,
        )
    }

    /// A `Manager` with no environments and no maintenance thread, for
    /// exercising registry-only operations like `destroy_ctx` without
    /// the overhead of real OS threads.
    fn bare_manager() -> Manager {
        Manager {
            config: ManagerConfig::new(),
            envs: RwLock::new(Vec::new()),
            ctxs: RwLock::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            maintenance: StdMutex::new(None),
            pending_destroys: StdMutex::new(Vec::new()),
        }
    }

    #[test]
    fn destroy_ctx_succeeds_immediately_when_not_locked() {
        let manager = bare_manager();
        let ctx = make_ctx();
        manager.ctxs.write().unwrap().insert(ctx.id(), ctx.clone());

        assert!(manager.destroy_ctx(&ctx).is_ok());
        assert!(!manager.ctxs.read().unwrap().contains_key(&ctx.id()));
    }

    #[test]
    fn destroy_ctx_parks_and_retries_while_locked() {
        let manager = bare_manager();
        let ctx = make_ctx();
        manager.ctxs.write().unwrap().insert(ctx.id(), ctx.clone());
        ctx.set_locked(true);

        let err = manager.destroy_ctx(&ctx).unwrap_err();
        assert!(matches!(err, RuntimeError::NotDestroyable(id) if id == ctx.id()));
        assert!(manager.ctxs.read().unwrap().contains_key(&ctx.id()));

        ctx.set_locked(false);
        manager.retry_pending_destroys();
        assert!(!manager.ctxs.read().unwrap().contains_key(&ctx.id()));
    }

    #[test]
    fn find_movable_only_considers_ctxs_on_the_given_env() {
        let manager = bare_manager();
        let ctx = make_ctx();
        manager.ctxs.write().unwrap().insert(ctx.id(), ctx.clone());
        // `ctx` is movable but was never enrolled onto any env, so it
        // has no `env()` — `find_movable` must not return it as a
        // candidate for migrating onto or off of an unrelated env.
        let idle = make_ctx();
        let env = Env::new(idle, Weak::new(), None, true);
        assert!(manager.find_movable(&env).is_none());
    }
}
