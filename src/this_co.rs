//! Controls available to code running *as* a ctx (base spec §4.3).
//!
//! These are free functions, not methods on a handle, because the only
//! sensible target is always "whichever ctx is running right now" — a
//! handle would just be `this_co::id()` in a trench coat. Each one looks
//! up the calling OS thread's current ctx via thread-local state.

use std::time::{Duration, Instant};

use crate::ctx::{CtxFlags, CtxId};
use crate::env;

/// The identity of the currently running ctx.
///
/// # Panics
/// In debug builds, if called off a coroutine. Release builds return
/// `None`.
pub fn id() -> Option<CtxId> {
    match env::current_ctx() {
        Some(ctx) => Some(ctx.id()),
        None => {
            debug_assert!(false, "this_co::id() called off a coroutine");
            None
        }
    }
}

/// The currently running ctx's name, if it was given one at spawn time.
pub fn name() -> Option<String> {
    env::current_ctx().and_then(|ctx| ctx.name().map(str::to_owned))
}

/// Yield to the scheduler, allowing other ctxs on this environment a
/// chance to run. The calling ctx remains schedulable and may be chosen
/// again immediately if nothing else is runnable.
pub fn yield_now() {
    env::schedule_switch();
}

/// Suspend the calling ctx for at least `duration`.
pub fn sleep_for(duration: Duration) {
    sleep_until(Instant::now() + duration);
}

/// Suspend the calling ctx until at least `deadline`.
pub fn sleep_until(deadline: Instant) {
    let Some(env) = env::current_env() else {
        debug_assert!(false, "this_co::sleep_until() called off an environment thread");
        return;
    };
    let Some(me) = env::current_ctx() else {
        debug_assert!(false, "this_co::sleep_until() called off a coroutine");
        return;
    };
    me.insert_flags(CtxFlags::WAITING);
    env.sleep_ctx(me, deadline);
    env::schedule_switch();
}
