//! The shared wait-flag protocol every coroutine-aware primitive in this
//! module builds on (base spec §5): a ctx that must block sets its own
//! `WAITING` flag and enqueues itself under a spinlock, then yields to
//! its scheduler; waking it clears the flag and lets the scheduler pick
//! it up again next time it's at the front of a schedulable scan.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use spin::Mutex as SpinMutex;

use crate::ctx::{Ctx, CtxFlags, CtxState};
use crate::env;

/// A FIFO of blocked ctxs, shared by the mutex/condvar/semaphore/channel
/// implementations in this module.
pub(crate) struct WaitQueue {
    waiters: SpinMutex<VecDeque<Arc<Ctx>>>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self {
            waiters: SpinMutex::new(VecDeque::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Register the calling ctx as a waiter without blocking it yet.
    /// Pairs with [`WaitQueue::park`]/[`WaitQueue::park_timeout`] so a
    /// caller can enqueue itself *before* releasing some other lock that
    /// guards the condition — closing the gap between "unlock" and
    /// "block" where a wake from another ctx could otherwise be missed.
    pub fn enqueue(&self) -> Option<Arc<Ctx>> {
        let me = env::current_ctx()?;
        me.insert_flags(CtxFlags::WAITING);
        self.waiters.lock().push_back(me.clone());
        Some(me)
    }

    /// Block the calling ctx, already registered via [`WaitQueue::enqueue`],
    /// until some other ctx calls `wake_one` or `wake_all`.
    pub fn park(&self) {
        env::schedule_switch();
    }

    /// Like [`WaitQueue::park`], but also gives up once `deadline` passes.
    /// Returns `true` if woken normally, `false` if the deadline elapsed
    /// first. `me` must be the ctx most recently returned by `enqueue`.
    pub fn park_timeout(&self, me: &Arc<Ctx>, deadline: Instant) -> bool {
        let Some(env) = env::current_env() else {
            debug_assert!(false, "park_timeout() called off an environment thread");
            return false;
        };
        env.sleep_ctx(me.clone(), deadline);
        env::schedule_switch();

        let mut waiters = self.waiters.lock();
        if let Some(pos) = waiters.iter().position(|c| c.id() == me.id()) {
            waiters.remove(pos);
            false
        } else {
            true
        }
    }

    /// Block the calling ctx until some other ctx calls `wake_one` or
    /// `wake_all`. The caller must have already released whatever lock
    /// protected the condition it's waiting on.
    pub fn wait(&self) {
        let Some(_me) = self.enqueue() else {
            debug_assert!(false, "wait() called off a coroutine");
            return;
        };
        self.park();
    }

    /// Like [`WaitQueue::wait`], but also gives up after `timeout`.
    /// Returns `true` if woken normally, `false` if the timeout elapsed
    /// first.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(me) = self.enqueue() else {
            debug_assert!(false, "wait_timeout() called off a coroutine");
            return false;
        };
        self.park_timeout(&me, Instant::now() + timeout)
    }

    /// Wake the longest-waiting ctx, if any. Returns whether one was
    /// woken.
    pub fn wake_one(&self) -> bool {
        let Some(ctx) = self.waiters.lock().pop_front() else {
            return false;
        };
        wake(&ctx);
        true
    }

    pub fn wake_all(&self) {
        let drained: Vec<_> = self.waiters.lock().drain(..).collect();
        for ctx in drained {
            wake(&ctx);
        }
    }
}

fn wake(ctx: &Arc<Ctx>) {
    ctx.remove_flags(CtxFlags::WAITING);
    if let Some(env) = ctx.env() {
        env.notify();
    }
}

/// Block the calling ctx until `target` reaches `Finished`, or `timeout`
/// elapses first. Returns the finished ctx's stored return value, or
/// `None` on timeout. Used by [`crate::manager::Manager::join`].
///
/// Delivery crosses environments via `target`'s own event hooks, guarded
/// by `target`'s spinlock (base spec §9) — the waiter subscribes a
/// callback that clears its own `WAITING` flag once `target` finishes.
pub(crate) fn wait_for(target: &Arc<Ctx>, timeout: Option<Duration>) -> Option<Box<dyn std::any::Any + Send>> {
    if target.state() == CtxState::Finished {
        return target.take_ret();
    }

    let Some(env) = env::current_env() else {
        debug_assert!(false, "wait_for() called off an environment thread");
        return None;
    };
    let Some(me) = env::current_ctx() else {
        debug_assert!(false, "wait_for() called off a coroutine");
        return None;
    };

    me.insert_flags(CtxFlags::WAITING);
    let woken = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let woken2 = woken.clone();
    let waiter = me.clone();
    let handle = target.hooks.subscribe(move |event| {
        if matches!(event, crate::hooks::CtxEvent::StateChanged(CtxState::Finished))
            && !woken2.swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            wake(&waiter);
        }
    });

    // `target` may have finished between the check above and subscribing.
    if target.state() == CtxState::Finished {
        if !woken.swap(true, std::sync::atomic::Ordering::AcqRel) {
            me.remove_flags(CtxFlags::WAITING);
        }
    } else if let Some(timeout) = timeout {
        env.sleep_ctx(me.clone(), Instant::now() + timeout);
    }

    env::schedule_switch();
    target.hooks.unsubscribe(handle);
    target.take_ret()
}
