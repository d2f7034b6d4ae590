//! Completion barrier for background work started by a session.
//!
//! Work is registered before it is dispatched by taking a [`WorkGuard`];
//! dropping the guard marks the unit finished. Waiters block on a condvar
//! until the count reaches zero, a deadline passes, or a [`CancelToken`] is
//! tripped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::errors::{Result, SsbError};

/// How often a waiter re-checks its cancel token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Counter of outstanding background units.
#[derive(Debug, Default)]
pub struct CompletionBarrier {
    pending: Mutex<usize>,
    idle: Condvar,
}

/// One registered unit of work. Dropping it completes the unit.
#[derive(Debug)]
#[must_use = "dropping a WorkGuard immediately completes the unit"]
pub struct WorkGuard {
    barrier: Arc<CompletionBarrier>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        let mut pending = self.barrier.pending.lock();
        debug_assert!(*pending > 0, "work guard released more than once");
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.barrier.idle.notify_all();
        }
    }
}

/// Shared flag that aborts a pending wait. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing flag, e.g. one registered with `signal_hook::flag`.
    #[must_use]
    pub const fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

impl CompletionBarrier {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register one unit. Must happen before the work is handed off.
    pub fn register(self: &Arc<Self>) -> WorkGuard {
        *self.pending.lock() += 1;
        WorkGuard {
            barrier: Arc::clone(self),
        }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        *self.pending.lock()
    }

    /// Block until no work is outstanding.
    ///
    /// `None` for the deadline waits indefinitely. A deadline already in the
    /// past returns `Timeout` at once unless nothing is outstanding. Timing
    /// out or cancelling never stops the work itself.
    pub fn wait(&self, deadline: Option<Instant>, cancel: Option<&CancelToken>) -> Result<()> {
        let mut pending = self.pending.lock();
        loop {
            if *pending == 0 {
                return Ok(());
            }
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(SsbError::Cancelled { pending: *pending });
            }

            let now = Instant::now();
            if let Some(deadline) = deadline
                && now >= deadline
            {
                return Err(SsbError::Timeout { pending: *pending });
            }

            let wake_at = match (deadline, cancel) {
                (Some(deadline), Some(_)) => deadline.min(now + CANCEL_POLL_INTERVAL),
                (Some(deadline), None) => deadline,
                (None, Some(_)) => now + CANCEL_POLL_INTERVAL,
                (None, None) => {
                    self.idle.wait(&mut pending);
                    continue;
                }
            };
            let _ = self.idle.wait_until(&mut pending, wake_at);
        }
    }
}
