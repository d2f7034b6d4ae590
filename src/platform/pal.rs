//! Capacity probe trait and its statvfs-backed and in-memory implementations.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SsbError};

/// Point-in-time disk usage for the filesystem holding a root path.
///
/// Always fetched fresh; callers must not cache it across capacity checks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskUsage {
    pub total: u64,
    pub free: u64,
    pub used: u64,
}

impl DiskUsage {
    /// Build a snapshot from total and free bytes; `used` is derived.
    #[must_use]
    pub fn from_total_free(total: u64, free: u64) -> Self {
        Self {
            total,
            free,
            used: total.saturating_sub(free),
        }
    }

    #[must_use]
    pub fn used_pct(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            (self.used as f64 * 100.0) / self.total as f64
        }
    }
}

/// Source of disk usage snapshots for a root location.
pub trait CapacityProbe: Send + Sync {
    fn disk_usage(&self, root: &Path) -> Result<DiskUsage>;
}

/// Probe backed by `statvfs(2)`. Free space is what an unprivileged writer can use.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

impl StatvfsProbe {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
impl CapacityProbe for StatvfsProbe {
    fn disk_usage(&self, root: &Path) -> Result<DiskUsage> {
        let stat = nix::sys::statvfs::statvfs(root).map_err(|error| SsbError::CapacityProbe {
            path: root.to_path_buf(),
            details: error.to_string(),
        })?;
        #[allow(clippy::useless_conversion)]
        let fragment = u64::from(stat.fragment_size());
        #[allow(clippy::useless_conversion)]
        let total = u64::from(stat.blocks()).saturating_mul(fragment);
        #[allow(clippy::useless_conversion)]
        let free = u64::from(stat.blocks_available()).saturating_mul(fragment);
        Ok(DiskUsage::from_total_free(total, free))
    }
}

#[cfg(not(unix))]
impl CapacityProbe for StatvfsProbe {
    fn disk_usage(&self, root: &Path) -> Result<DiskUsage> {
        Err(SsbError::CapacityProbe {
            path: root.to_path_buf(),
            details: "statvfs is only available on unix platforms".to_string(),
        })
    }
}

/// In-memory probe for deterministic tests and dry runs.
///
/// Free space can be changed while sessions are running, and the probe can be
/// switched into a failing mode to exercise error absorption.
#[derive(Debug)]
pub struct MockProbe {
    total: AtomicU64,
    free: AtomicU64,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockProbe {
    #[must_use]
    pub fn new(total: u64, free: u64) -> Self {
        Self {
            total: AtomicU64::new(total),
            free: AtomicU64::new(free.min(total)),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_free(&self, free: u64) {
        let total = self.total.load(Ordering::SeqCst);
        self.free.store(free.min(total), Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn free(&self) -> u64 {
        self.free.load(Ordering::SeqCst)
    }

    /// Number of `disk_usage` calls served so far, failures included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CapacityProbe for MockProbe {
    fn disk_usage(&self, root: &Path) -> Result<DiskUsage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SsbError::CapacityProbe {
                path: root.to_path_buf(),
                details: "mock probe configured to fail".to_string(),
            });
        }
        Ok(DiskUsage::from_total_free(
            self.total.load(Ordering::SeqCst),
            self.free.load(Ordering::SeqCst),
        ))
    }
}
