//! Backup sessions: capacity-aware local copies and background remote uploads.
//!
//! Both variants share the same surface ([`BackupSession`]) and the same
//! completion barrier semantics. Only the local variant manages capacity;
//! see [`coordinator`] for the check/clean cycle.

#![allow(missing_docs)]

pub mod accumulator;
pub mod barrier;
pub mod coordinator;
pub mod local;
pub mod remote;
pub mod trigger;

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::errors::{Result, SsbError};
pub use barrier::CancelToken;
pub use trigger::CleaningState;

/// Point-in-time counters for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub files_saved: u64,
    pub bytes_saved: u64,
    /// Bytes written since the last completed cleanup pass.
    pub accumulated_bytes: u64,
    pub passes_started: u64,
    pub passes_completed: u64,
    pub outstanding: usize,
    pub cleaning: CleaningState,
    pub transfer_failures: usize,
}

/// A destination that accepts files for safekeeping.
pub trait BackupSession: Send + Sync {
    /// Back up `source` to `relative_destination` under the session's root or prefix.
    fn save(&self, source: &Path, relative_destination: &str) -> Result<()>;

    /// Block until all background work finishes, `deadline` passes, or `cancel` trips.
    /// A timed-out or cancelled wait leaves the work running.
    fn wait_until(&self, deadline: Option<Instant>, cancel: Option<&CancelToken>) -> Result<()>;

    fn wait_for_completion(&self, timeout: Duration) -> Result<()> {
        self.wait_until(Instant::now().checked_add(timeout), None)
    }

    /// Stop accepting saves. Neither cancels nor waits for outstanding work.
    fn close(&self) -> Result<()>;

    fn stats(&self) -> SessionStats;
}

/// Reject empty or non-regular sources before any state is touched.
pub(crate) fn checked_source(source: &Path) -> Result<fs::Metadata> {
    if source.as_os_str().is_empty() {
        return Err(SsbError::invalid_input("source path is empty"));
    }
    let meta = fs::metadata(source).map_err(|e| SsbError::BackupFailed {
        path: source.to_path_buf(),
        details: format!("cannot stat source: {e}"),
    })?;
    if !meta.is_file() {
        return Err(SsbError::invalid_input(format!(
            "source is not a regular file: {}",
            source.display()
        )));
    }
    Ok(meta)
}

/// Relative destinations must stay below the root.
pub(crate) fn checked_relative(relative: &str) -> Result<PathBuf> {
    if relative.trim().is_empty() {
        return Err(SsbError::invalid_input("destination path is empty"));
    }
    let rel = PathBuf::from(relative);
    let escapes = rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        || relative.split(['/', '\\']).any(|part| part == "..");
    if escapes {
        return Err(SsbError::invalid_input(format!(
            "destination must be relative and stay inside the root: {relative}"
        )));
    }
    // `components()` silently drops a trailing `.` and `/`, so the raw text
    // is checked too.
    let names_a_file = matches!(rel.components().next_back(), Some(Component::Normal(_)))
        && !relative.ends_with(['/', '\\'])
        && !relative.ends_with("/.")
        && !relative.ends_with("\\.");
    if !names_a_file {
        return Err(SsbError::invalid_input(format!(
            "destination must name a file below the root: {relative}"
        )));
    }
    Ok(rel)
}
