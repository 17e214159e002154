//! A coroutine-aware condition variable, paired with [`Mutex`] the same
//! way `std::sync::Condvar` is paired with `std::sync::Mutex`.

use std::time::{Duration, Instant};

use super::mutex::{Mutex, MutexGuard};
use super::wait::WaitQueue;

pub struct Condvar {
    waiters: WaitQueue,
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

impl Condvar {
    pub fn new() -> Self {
        Self {
            waiters: WaitQueue::new(),
        }
    }

    /// Release `guard`'s mutex and block until woken, then reacquire it.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex: &'a Mutex<T> = guard.mutex;
        // Enqueue before releasing the mutex: a notify landing between
        // "unlock" and "park" must still find us in the wait queue,
        // otherwise it's lost and we'd park with no one left to wake us.
        let me = self.waiters.enqueue();
        debug_assert!(me.is_some(), "Condvar::wait() called off a coroutine");
        drop(guard);
        if me.is_some() {
            self.waiters.park();
        }
        mutex.lock()
    }

    /// Like [`Condvar::wait`], but gives up after `timeout`. The second
    /// element of the returned pair is `true` iff the timeout elapsed.
    pub fn wait_timeout<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> (MutexGuard<'a, T>, bool) {
        let mutex: &'a Mutex<T> = guard.mutex;
        let me = self.waiters.enqueue();
        debug_assert!(me.is_some(), "Condvar::wait_timeout() called off a coroutine");
        drop(guard);
        let woken = match &me {
            Some(me) => self.waiters.park_timeout(me, Instant::now() + timeout),
            None => false,
        };
        (mutex.lock(), !woken)
    }

    pub fn notify_one(&self) {
        self.waiters.wake_one();
    }

    pub fn notify_all(&self) {
        self.waiters.wake_all();
    }
}
