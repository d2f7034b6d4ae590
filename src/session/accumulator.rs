//! Lock-free running total of bytes written since the last capacity check.

use std::sync::atomic::{AtomicU64, Ordering};

/// Concurrent byte counter shared by every save on a session.
///
/// Adds never lose updates. The total saturates at `u64::MAX` instead of
/// wrapping, so an overflow can only ever force an earlier capacity check.
#[derive(Debug, Default)]
pub struct SizeAccumulator {
    bytes: AtomicU64,
}

impl SizeAccumulator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: AtomicU64::new(0),
        }
    }

    /// Add `n` bytes and return the new total as observed by this caller.
    pub fn add(&self, n: u64) -> u64 {
        let prev = self
            .bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(cur.saturating_add(n))
            })
            .unwrap_or_else(|cur| cur);
        prev.saturating_add(n)
    }

    #[must_use]
    pub fn load(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.bytes.store(0, Ordering::Release);
    }
}
