//! Binary and counting semaphores, both instances of the same counter
//! with a configurable ceiling (base spec §5).

use spin::Mutex as SpinMutex;

use super::wait::WaitQueue;

pub struct Semaphore {
    permits: SpinMutex<usize>,
    max: usize,
    waiters: WaitQueue,
    release_waiters: WaitQueue,
}

impl Semaphore {
    /// A general counting semaphore with `initial` permits available,
    /// never exceeding `max`.
    pub fn counting(initial: usize, max: usize) -> Self {
        Self {
            permits: SpinMutex::new(initial.min(max)),
            max,
            waiters: WaitQueue::new(),
            release_waiters: WaitQueue::new(),
        }
    }

    /// A semaphore with exactly one permit, `locked` deciding whether
    /// it starts held.
    pub fn binary(locked: bool) -> Self {
        Self::counting(if locked { 0 } else { 1 }, 1)
    }

    pub fn acquire(&self) {
        self.acquire_n(1)
    }

    /// Acquire `n` permits at once, blocking until all `n` are
    /// available together.
    pub fn acquire_n(&self, n: usize) {
        loop {
            if self.try_acquire_n(n) {
                return;
            }
            self.waiters.wait();
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_n(1)
    }

    pub fn try_acquire_n(&self, n: usize) -> bool {
        let mut permits = self.permits.lock();
        if *permits >= n {
            *permits -= n;
            drop(permits);
            self.release_waiters.wake_one();
            true
        } else {
            false
        }
    }

    /// Release one permit. Blocks the releasing ctx, rather than
    /// dropping the release, while the semaphore is already at `max` —
    /// mirrors a bounded resource pool being handed back a slot that
    /// doesn't exist yet until `acquire` frees room for it.
    pub fn release(&self) {
        self.release_n(1)
    }

    /// Release `n` permits at once, blocking while `n` of them don't
    /// fit under `max`.
    pub fn release_n(&self, n: usize) {
        loop {
            let mut permits = self.permits.lock();
            if *permits + n <= self.max {
                *permits += n;
                drop(permits);
                self.waiters.wake_all();
                return;
            }
            drop(permits);
            self.release_waiters.wait();
        }
    }

    pub fn available(&self) -> usize {
        *self.permits.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_semaphore_starts_unlocked_by_default() {
        let sem = Semaphore::binary(false);
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release();
        assert!(sem.try_acquire());
    }

    #[test]
    fn counting_semaphore_accumulates_releases_up_to_max() {
        let sem = Semaphore::counting(0, 2);
        sem.release();
        sem.release();
        assert_eq!(sem.available(), 2);
    }

    #[test]
    fn try_acquire_n_requires_all_permits_at_once() {
        let sem = Semaphore::counting(1, 2);
        assert!(!sem.try_acquire_n(2));
        sem.release();
        assert!(sem.try_acquire_n(2));
        assert_eq!(sem.available(), 0);
    }
}
