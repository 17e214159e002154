//! Configuration surfaces exposed at the crate boundary.
//!
//! These mirror the base spec's "Configuration options (enumerated)" list
//! plus the manager-level policy knobs the base spec leaves open (exact
//! migration threshold, minimum env count — see DESIGN.md).

use std::time::Duration;

use crate::scheduler::PRIORITY_LEVELS;

/// Default stack size for a coroutine: 64 KiB, a conservative default for
/// a cooperatively-scheduled stack that is not expected to host deep
/// recursion.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Per-coroutine configuration, supplied to [`crate::spawn`].
#[derive(Debug, Clone)]
pub struct CoroutineConfig {
    pub(crate) stack_size: usize,
    pub(crate) name: Option<String>,
    pub(crate) priority: u8,
    pub(crate) shared_stack: bool,
    pub(crate) bind_env: bool,
}

impl Default for CoroutineConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            name: None,
            priority: PRIORITY_LEVELS as u8 / 2,
            shared_stack: false,
            bind_env: false,
        }
    }
}

impl CoroutineConfig {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack size in bytes. Rounded up to a page by the stack allocator.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Diagnostic name, surfaced through `this_co::name()` and logging.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Scheduling priority in `[0, PRIORITY_LEVELS)`. Out-of-range values
    /// are clamped, never rejected — see the base spec's priority-clamp
    /// invariant.
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(PRIORITY_LEVELS as u8 - 1);
        self
    }

    /// Use the hosting environment's shared stack instead of an exclusive
    /// allocation. Mutually exclusive with migration (sets `SHARED_STACK`,
    /// which makes the ctx non-movable).
    pub fn shared_stack(mut self, shared: bool) -> Self {
        self.shared_stack = shared;
        self
    }

    /// Pin the ctx to whichever environment first schedules it (sets
    /// `BIND`, which makes the ctx non-movable).
    pub fn bind_env(mut self, bind: bool) -> Self {
        self.bind_env = bind;
        self
    }
}

/// Manager-level configuration, supplied to [`crate::init`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Number of environments created at startup.
    pub worker_threads: usize,
    /// Minimum number of environments the maintenance loop will keep
    /// alive even while idle.
    pub min_workers: usize,
    /// How long an environment may sit idle before the maintenance loop
    /// destroys it (subject to `min_workers`).
    pub max_idle: Duration,
    /// Interval between maintenance-loop sweeps (reclaim, destroy,
    /// rebalance).
    pub rebalance_interval: Duration,
    /// Workload-count gap between the most- and least-loaded environment
    /// that triggers migrating one movable ctx per sweep.
    pub rebalance_threshold: usize,
    /// If set, every environment is created with a shared-stack region of
    /// this size, usable by ctxs spawned with `shared_stack(true)`. `None`
    /// means no environment supports shared-stack ctxs.
    pub shared_stack_size: Option<usize>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            worker_threads: workers,
            min_workers: 1,
            max_idle: Duration::from_secs(30),
            rebalance_interval: Duration::from_millis(50),
            rebalance_threshold: 4,
            shared_stack_size: None,
        }
    }
}

impl ManagerConfig {
    /// Start from the defaults (one environment per available core).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads created at startup.
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n.max(1);
        self
    }

    /// Set the minimum environment count the maintenance loop preserves.
    pub fn min_workers(mut self, n: usize) -> Self {
        self.min_workers = n.max(1);
        self
    }

    /// Set the idle threshold before an environment is destroyed.
    pub fn max_idle(mut self, d: Duration) -> Self {
        self.max_idle = d;
        self
    }

    /// Set the maintenance loop's sweep interval.
    pub fn rebalance_interval(mut self, d: Duration) -> Self {
        self.rebalance_interval = d;
        self
    }

    /// Set the workload gap that triggers migration.
    pub fn rebalance_threshold(mut self, gap: usize) -> Self {
        self.rebalance_threshold = gap;
        self
    }

    /// Give every environment a shared-stack region of `size` bytes, so
    /// ctxs spawned with `shared_stack(true)` have somewhere to run.
    pub fn shared_stack_size(mut self, size: usize) -> Self {
        self.shared_stack_size = Some(size);
        self
    }
}
