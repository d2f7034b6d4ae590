//! Capacity-reclaiming engine contract and the default age-ordered engine.
//!
//! A backup session hands the engine a root and a target usage percentage;
//! the engine deletes content until usage is at or below that level or it
//! runs out of eligible files. The session does not interpret the report
//! beyond logging it.

#![allow(missing_docs)]

pub mod age_ordered;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;

/// Pass-through options for a reclaim run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReclaimOptions {
    /// Target usage level in percent of total capacity. When unset, sessions
    /// derive it from `target_free_space`.
    pub max_usage_percent: Option<f64>,
    /// Prune directories left empty by deletions (never the root itself).
    pub remove_empty_dirs: bool,
    /// Regexes matched against the root-relative path (`/` separated).
    /// Matching files are never deleted.
    pub protect_patterns: Vec<String>,
    /// Files modified more recently than this are left alone.
    pub min_file_age_secs: u64,
    /// Upper bound on deletions per run.
    pub max_deletions: Option<usize>,
    /// Report what would be deleted without deleting.
    pub dry_run: bool,
}

impl Default for ReclaimOptions {
    fn default() -> Self {
        Self {
            max_usage_percent: None,
            remove_empty_dirs: true,
            protect_patterns: Vec::new(),
            min_file_age_secs: 0,
            max_deletions: None,
            dry_run: false,
        }
    }
}

/// A single file the engine could not delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of one reclaim run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReclaimReport {
    pub target_usage_pct: f64,
    pub files_deleted: usize,
    pub bytes_freed: u64,
    pub dirs_removed: usize,
    pub files_skipped: usize,
    pub errors: Vec<ReclaimFailure>,
    pub target_reached: bool,
    pub dry_run: bool,
    pub duration: Duration,
}

/// Deletes content under a root until a usage target is reached.
pub trait ReclaimEngine: Send + Sync {
    fn clean(&self, root: &Path, options: &ReclaimOptions) -> Result<ReclaimReport>;
}
