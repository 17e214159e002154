//! The landing pad every freshly created ctx's stack is seeded to resume
//! into (base spec §4.1, §9) — recovers the argument platform::switch
//! restored into a callee-saved register, then runs the ctx's entry
//! thunk to completion.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use crate::ctx::{Ctx, CtxFlags, CtxState, Entry};
use crate::env;

/// Wrap a user body so a panic inside it becomes the ctx's return value
/// instead of unwinding into the scheduler — mirrors
/// `std::thread::JoinHandle::join`'s `Result<T, Box<dyn Any + Send>>`,
/// collapsed into a single `Box<dyn Any + Send>` since every ctx already
/// returns one.
pub(crate) fn spawn_entry(body: Box<dyn FnOnce() -> Box<dyn Any + Send> + Send>) -> Entry {
    Box::new(move || match std::panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(ret) => ret,
        Err(payload) => payload,
    })
}

/// # Safety
/// Must only ever be reached via [`crate::platform::switch`] landing on a
/// stack [`crate::platform::init_stack_with_arg`] prepared for this
/// function, with `r12` holding a `*const Ctx` whose pointee outlives
/// this call (the manager's registry or the hosting environment's
/// scheduler always holds a strong reference while a ctx can run).
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn ctx_trampoline() -> ! {
    core::arch::naked_asm!(
        "mov rdi, r12",
        "call {entry}",
        "ud2",
        entry = sym trampoline_entry,
    )
}

unsafe extern "C" fn trampoline_entry(ctx_ptr: *const Ctx) -> ! {
    // SAFETY: see `ctx_trampoline`'s contract.
    let ctx: &Ctx = unsafe { &*ctx_ptr };

    // Mirrors the flag-clearing every resumed ctx does right after its
    // own `platform::switch` call returns (src/env.rs); a ctx's very
    // first run has no such call site, so the trampoline does it here.
    ctx.remove_flags(CtxFlags::SWITCHING);
    ctx.set_state(CtxState::Running);

    let entry = ctx
        .take_entry()
        .expect("a ctx's entry thunk is only ever taken once, by its own trampoline");
    let ret = entry();
    ctx.store_ret(ret);
    ctx.set_state(CtxState::Finished);

    env::schedule_switch();
    unreachable!("a finished ctx is never re-enrolled, so it is never chosen again")
}
