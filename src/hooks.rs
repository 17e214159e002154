//! Event hooks: tiny publish/subscribe channels attached to ctx/env
//! lifecycle transitions (base spec §9).
//!
//! Subscribers are invoked synchronously, under the owning entity's lock,
//! right after the mutation that triggered them — so a callback must be
//! quick and must not call back into the ctx/env that published the
//! event (that would deadlock on the very spinlock it's running under).

use std::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::ctx::CtxState;
use crate::env::EnvState;

/// Opaque handle returned by [`Hooks::subscribe`], used to unregister a
/// callback later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookHandle(u64);

type Callback<E> = Box<dyn Fn(&E) + Send + Sync>;

/// A publish/subscribe list for one lifecycle event type `E`.
pub struct Hooks<E> {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback<E>)>>,
}

impl<E> Default for Hooks<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<E> Hooks<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`, returning a handle that can later remove it.
    pub fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> HookHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, Box::new(callback)));
        HookHandle(id)
    }

    /// Remove a previously registered callback. A no-op if already
    /// removed.
    pub fn unsubscribe(&self, handle: HookHandle) {
        self.subscribers.lock().retain(|(id, _)| *id != handle.0);
    }

    /// Invoke every subscriber with `event`. Must be called with the
    /// owning entity's lock already held (the caller's responsibility,
    /// not this type's).
    pub fn publish(&self, event: &E) {
        for (_, callback) in self.subscribers.lock().iter() {
            callback(event);
        }
    }
}

/// Lifecycle events published by a [`crate::ctx::Ctx`].
#[derive(Debug, Clone)]
pub enum CtxEvent {
    /// `state` changed to a new value.
    StateChanged(CtxState),
    /// The ctx was (re)assigned to an environment, e.g. by migration.
    EnvSet,
    /// The ctx's priority changed from `old` to `new`.
    PriorityChanged { old: u8, new: u8 },
    /// The ctx's stack was (re)assigned (exclusive/shared transition).
    StackSet,
    /// The ctx's `LOCKED` flag was set or cleared; `locked` reflects the
    /// new value.
    LockChanged { locked: bool },
}

/// Lifecycle events published by a [`crate::env::Env`].
#[derive(Debug, Clone)]
pub enum EnvEvent {
    /// `state` changed to a new value.
    StateChanged(EnvState),
    /// A ctx was added to this environment's scheduler.
    CtxAdded,
    /// A ctx left this environment's scheduler (finished, or migrated
    /// away).
    CtxRemoved,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn subscribers_see_published_events_in_order() {
        let hooks: Hooks<u32> = Hooks::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        hooks.subscribe(move |e| seen2.lock().push(*e));
        hooks.publish(&1);
        hooks.publish(&2);
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hooks: Hooks<u32> = Hooks::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let handle = hooks.subscribe(move |_| {
            count2.fetch_add(1, Ordering::Relaxed);
        });
        hooks.publish(&1);
        hooks.unsubscribe(handle);
        hooks.publish(&2);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
