//! Channels: bounded (`N > 0`), unbounded (`N < 0`, modeled here as
//! `None`), and rendezvous (`N == 0`) — base spec §5.
//!
//! Bounded and unbounded channels share one buffered implementation.
//! Rendezvous is handled separately: there is no buffer at all, a
//! sender deposits directly into a one-shot slot and parks until the
//! receiver that takes it wakes it back up individually, so a handoff
//! always completes between exactly the two ctxs involved.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spin::Mutex as SpinMutex;

use crate::ctx::{Ctx, CtxFlags};
use crate::env;

use super::wait::WaitQueue;

/// A buffered channel; `capacity: None` is unbounded, `Some(n)` bounded
/// to `n` in-flight items.
pub struct Channel<T> {
    capacity: Option<usize>,
    queue: SpinMutex<VecDeque<T>>,
    closed: AtomicBool,
    send_waiters: WaitQueue,
    recv_waiters: WaitQueue,
}

impl<T> Channel<T> {
    pub fn bounded(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: Some(capacity),
            queue: SpinMutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            send_waiters: WaitQueue::new(),
            recv_waiters: WaitQueue::new(),
        })
    }

    pub fn unbounded() -> Arc<Self> {
        Arc::new(Self {
            capacity: None,
            queue: SpinMutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            send_waiters: WaitQueue::new(),
            recv_waiters: WaitQueue::new(),
        })
    }

    /// Block until there's room, then enqueue `value`. Returns `value`
    /// back if the channel is closed.
    pub fn send(&self, value: T) -> Result<(), T> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(value);
            }
            let mut queue = self.queue.lock();
            let has_room = match self.capacity {
                None => true,
                Some(n) => queue.len() < n,
            };
            if has_room {
                queue.push_back(value);
                drop(queue);
                self.recv_waiters.wake_one();
                return Ok(());
            }
            drop(queue);
            self.send_waiters.wait();
        }
    }

    /// Dequeue an item, blocking if the channel is empty but open.
    /// Returns `None` once the channel is closed and drained.
    pub fn recv(&self) -> Option<T> {
        loop {
            let mut queue = self.queue.lock();
            if let Some(value) = queue.pop_front() {
                drop(queue);
                self.send_waiters.wake_one();
                return Some(value);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            drop(queue);
            self.recv_waiters.wait();
        }
    }

    pub fn try_send(&self, value: T) -> Result<(), T> {
        if self.closed.load(Ordering::Acquire) {
            return Err(value);
        }
        let mut queue = self.queue.lock();
        let has_room = match self.capacity {
            None => true,
            Some(n) => queue.len() < n,
        };
        if has_room {
            queue.push_back(value);
            drop(queue);
            self.recv_waiters.wake_one();
            Ok(())
        } else {
            Err(value)
        }
    }

    pub fn try_recv(&self) -> Option<T> {
        let mut queue = self.queue.lock();
        let value = queue.pop_front();
        drop(queue);
        if value.is_some() {
            self.send_waiters.wake_one();
        }
        value
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the channel: pending and future `send`s fail, `recv` keeps
    /// draining whatever's already buffered and then returns `None`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.send_waiters.wake_all();
        self.recv_waiters.wake_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct Handoff<T> {
    value: T,
    sender: Arc<Ctx>,
}

/// A zero-capacity channel: a `send` only completes once a matching
/// `recv` has actually taken the value.
pub struct Rendezvous<T> {
    slot: SpinMutex<Option<Handoff<T>>>,
    closed: AtomicBool,
    send_waiters: WaitQueue,
    recv_waiters: WaitQueue,
}

impl<T> Rendezvous<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: SpinMutex::new(None),
            closed: AtomicBool::new(false),
            send_waiters: WaitQueue::new(),
            recv_waiters: WaitQueue::new(),
        })
    }

    pub fn send(&self, value: T) -> Result<(), T> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(value);
            }
            let mut slot = self.slot.lock();
            if slot.is_some() {
                drop(slot);
                self.send_waiters.wait();
                continue;
            }
            let Some(me) = env::current_ctx() else {
                debug_assert!(false, "Rendezvous::send called off a coroutine");
                return Err(value);
            };
            me.insert_flags(CtxFlags::WAITING);
            *slot = Some(Handoff { value, sender: me });
            drop(slot);
            self.recv_waiters.wake_one();
            // Parked here until `recv` takes the value and wakes this
            // exact ctx (not a generic waiter-list pop), so only the
            // sender whose value was actually taken ever resumes.
            env::schedule_switch();
            return Ok(());
        }
    }

    pub fn recv(&self) -> Option<T> {
        loop {
            let mut slot = self.slot.lock();
            if let Some(handoff) = slot.take() {
                drop(slot);
                handoff.sender.remove_flags(CtxFlags::WAITING);
                if let Some(env) = handoff.sender.env() {
                    env.notify();
                }
                self.send_waiters.wake_one();
                return Some(handoff.value);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            drop(slot);
            self.recv_waiters.wait();
        }
    }

    /// Closing while a send is deposited-but-unclaimed leaves that
    /// sender parked; callers are expected to drain with `recv` before
    /// closing a rendezvous channel for this reason.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.send_waiters.wake_all();
        self.recv_waiters.wake_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_try_send_respects_capacity() {
        let ch = Channel::bounded(1);
        assert!(ch.try_send(1).is_ok());
        assert_eq!(ch.try_send(2), Err(2));
        assert_eq!(ch.try_recv(), Some(1));
        assert!(ch.try_send(3).is_ok());
    }

    #[test]
    fn unbounded_never_rejects_try_send() {
        let ch = Channel::unbounded();
        for i in 0..64 {
            assert!(ch.try_send(i).is_ok());
        }
        assert_eq!(ch.len(), 64);
    }

    #[test]
    fn closed_channel_rejects_send_but_drains() {
        let ch = Channel::bounded(4);
        ch.try_send(1).unwrap();
        ch.close();
        assert_eq!(ch.try_send(2), Err(2));
        assert_eq!(ch.try_recv(), Some(1));
        assert_eq!(ch.try_recv(), None);
    }
}
