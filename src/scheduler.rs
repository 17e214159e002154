//! The per-environment, O(1)-amortized priority scheduler (base spec §4.2).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use crate::ctx::{Ctx, CtxId};

/// Number of distinct priority levels. Priority 0 is lowest, `PRIORITY_LEVELS - 1`
/// highest; [`Ctx::priority`] is clamped into this range.
pub const PRIORITY_LEVELS: usize = 8;

/// One environment's run queues: `PRIORITY_LEVELS` FIFOs plus a bitmap of
/// which ones are non-empty, so picking the highest populated level never
/// has to scan empty queues.
///
/// A ctx remains a member of its queue for as long as it is alive and
/// hosted by this environment, *including* while `WAITING` — blocking
/// does not dequeue it (base spec §4.2). `choose` simply skips waiting
/// entries as it scans.
pub struct Scheduler {
    queues: [VecDeque<Arc<Ctx>>; PRIORITY_LEVELS],
    bitmap: u8,
    count: usize,
    idle: Arc<Ctx>,
    sleeping: Vec<(Instant, Arc<Ctx>)>,
}

impl Scheduler {
    pub fn new(idle: Arc<Ctx>) -> Self {
        Self {
            queues: std::array::from_fn(|_| VecDeque::new()),
            bitmap: 0,
            count: 0,
            idle,
            sleeping: Vec::new(),
        }
    }

    pub fn idle(&self) -> Arc<Ctx> {
        self.idle.clone()
    }

    /// Total number of ctxs currently enrolled (not counting the idle
    /// ctx, which is never enqueued).
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Enroll `ctx` in its priority's queue.
    pub fn add(&mut self, ctx: Arc<Ctx>) {
        let level = ctx.priority() as usize;
        self.queues[level].push_back(ctx);
        self.bitmap |= 1 << level;
        self.count += 1;
    }

    /// Remove `id` from wherever it's enrolled. Returns it if found.
    /// `O(n)` in that priority level's queue length.
    pub fn remove(&mut self, id: CtxId) -> Option<Arc<Ctx>> {
        for level in 0..PRIORITY_LEVELS {
            let queue = &mut self.queues[level];
            if let Some(pos) = queue.iter().position(|c| c.id() == id) {
                let ctx = queue.remove(pos);
                if queue.is_empty() {
                    self.bitmap &= !(1 << level);
                }
                self.count -= 1;
                return ctx;
            }
        }
        None
    }

    /// Move `ctx` (currently enrolled at `old_priority`) to its
    /// (already-updated) current priority's queue, at the tail.
    pub fn change_priority(&mut self, old_priority: u8, ctx: Arc<Ctx>) {
        let old = old_priority as usize;
        if let Some(pos) = self.queues[old].iter().position(|c| c.id() == ctx.id()) {
            self.queues[old].remove(pos);
            if self.queues[old].is_empty() {
                self.bitmap &= !(1 << old);
            }
            let new = ctx.priority() as usize;
            self.queues[new].push_back(ctx);
            self.bitmap |= 1 << new;
        }
    }

    /// Pick the next ctx to run: the highest-priority queue with at least
    /// one schedulable (non-`WAITING`, non-`Finished`) entry, rotated so
    /// that entry moves to the front and is popped out (it becomes
    /// `current`, no longer enrolled until it's re-added on suspend).
    /// Non-schedulable fronts are rotated to the back and skipped.
    ///
    /// Falls back to the environment's idle ctx if nothing is
    /// schedulable.
    pub fn choose(&mut self) -> Arc<Ctx> {
        for level in (0..PRIORITY_LEVELS).rev() {
            if self.bitmap & (1 << level) == 0 {
                continue;
            }
            let queue = &mut self.queues[level];
            let scan_len = queue.len();
            for _ in 0..scan_len {
                let Some(front) = queue.pop_front() else {
                    break;
                };
                if front.is_schedulable() {
                    if queue.is_empty() {
                        self.bitmap &= !(1 << level);
                    }
                    self.count -= 1;
                    return front;
                }
                queue.push_back(front);
            }
        }
        self.idle.clone()
    }

    /// Register `ctx` (already `WAITING` and enrolled) to be woken no
    /// later than `deadline`.
    pub fn sleep_until(&mut self, ctx: Arc<Ctx>, deadline: Instant) {
        self.sleeping.push((deadline, ctx));
    }

    /// Remove and return every ctx whose deadline has passed.
    pub fn expire_sleepers(&mut self, now: Instant) -> Vec<Arc<Ctx>> {
        let mut expired = Vec::new();
        self.sleeping.retain(|(deadline, ctx)| {
            if *deadline <= now {
                expired.push(ctx.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    /// Earliest pending deadline, if any — used to bound how long an
    /// idle environment parks before it must re-check for expired
    /// sleepers/timeouts.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sleeping.iter().map(|(d, _)| *d).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_STACK_SIZE;
    use crate::ctx::{CtxFlags, StackSlot};
    use crate::stack::Stack;

    unsafe extern "C" fn noop_trampoline() -> ! {
        unreachable!()
    }

    fn make_ctx(priority: u8) -> Arc<Ctx> {
        let stack = Stack::new(DEFAULT_STACK_SIZE).unwrap();
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

    fn make_idle() -> Arc<Ctx> {
        make_ctx(0)
    }

    #[test]
    fn higher_priority_is_chosen_first() {
        let mut sched = Scheduler::new(make_idle());
        let low = make_ctx(1);
        let high = make_ctx(5);
        sched.add(low.clone());
        sched.add(high.clone());
        let chosen = sched.choose();
        assert_eq!(chosen.id(), high.id());
    }

    #[test]
    fn same_level_is_round_robin() {
        let mut sched = Scheduler::new(make_idle());
        let a = make_ctx(3);
        let b = make_ctx(3);
        sched.add(a.clone());
        sched.add(b.clone());
        let first = sched.choose();
        sched.add(first.clone());
        let second = sched.choose();
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn waiting_fronts_are_skipped() {
        let mut sched = Scheduler::new(make_idle());
        let waiting = make_ctx(4);
        waiting.insert_flags(CtxFlags::WAITING);
        let runnable = make_ctx(4);
        sched.add(waiting.clone());
        sched.add(runnable.clone());
        let chosen = sched.choose();
        assert_eq!(chosen.id(), runnable.id());
        // the waiting ctx is still enrolled, just rotated to the back.
        assert_eq!(sched.len(), 1);
    }

    #[test]
    fn falls_back_to_idle_when_nothing_schedulable() {
        let idle = make_idle();
        let mut sched = Scheduler::new(idle.clone());
        let chosen = sched.choose();
        assert_eq!(chosen.id(), idle.id());
    }
}
