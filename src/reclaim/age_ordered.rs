//! Oldest-first reclaim engine.
//!
//! Pipeline: probe usage -> walk root -> filter protected/young files ->
//! sort by mtime ascending -> delete until projected usage reaches target ->
//! prune empty directories.
//!
//! Projected usage is the probe's `used` minus bytes freed so far. It is not
//! re-probed after every deletion: filesystems release blocks lazily and a
//! fresh statvfs mid-run would under-report progress.

#![allow(clippy::cast_precision_loss)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use regex::Regex;

use crate::core::errors::{Result, SsbError};
use crate::platform::pal::CapacityProbe;
use crate::reclaim::{ReclaimEngine, ReclaimFailure, ReclaimOptions, ReclaimReport};

/// A file the engine removed (or would remove, in dry-run mode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

type DeletionHook = Arc<dyn Fn(&DeletedFile) + Send + Sync>;

#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    size_bytes: u64,
    modified: SystemTime,
}

/// Default [`ReclaimEngine`]: deletes the oldest regular files first.
pub struct AgeOrderedReclaimer {
    probe: Arc<dyn CapacityProbe>,
    on_deleted: Option<DeletionHook>,
}

impl AgeOrderedReclaimer {
    pub fn new(probe: Arc<dyn CapacityProbe>) -> Self {
        Self {
            probe,
            on_deleted: None,
        }
    }

    /// Invoke `hook` for every file deleted (or selected, in dry-run mode).
    #[must_use]
    pub fn with_deletion_hook(mut self, hook: impl Fn(&DeletedFile) + Send + Sync + 'static) -> Self {
        self.on_deleted = Some(Arc::new(hook));
        self
    }

    fn notify(&self, file: &DeletedFile) {
        if let Some(hook) = &self.on_deleted {
            hook(file);
        }
    }
}

impl ReclaimEngine for AgeOrderedReclaimer {
    fn clean(&self, root: &Path, options: &ReclaimOptions) -> Result<ReclaimReport> {
        let start = Instant::now();
        let target_pct = resolve_target(root, options)?;
        let protect = compile_patterns(root, &options.protect_patterns)?;

        let usage = self.probe.disk_usage(root)?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let target_used = (usage.total as f64 * target_pct / 100.0).floor() as u64;
        let mut projected_used = usage.used;

        let mut report = ReclaimReport {
            target_usage_pct: target_pct,
            dry_run: options.dry_run,
            ..ReclaimReport::default()
        };

        if projected_used > target_used {
            let min_age = Duration::from_secs(options.min_file_age_secs);
            let mut candidates = collect_candidates(root, &protect, min_age, &mut report)?;
            candidates.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
            let limit = options.max_deletions.unwrap_or(usize::MAX);

            for candidate in candidates {
                if projected_used <= target_used || report.files_deleted >= limit {
                    break;
                }
                if !options.dry_run
                    && let Err(e) = fs::remove_file(&candidate.path)
                {
                    report.errors.push(ReclaimFailure {
                        path: candidate.path,
                        error: e.to_string(),
                    });
                    continue;
                }
                report.files_deleted += 1;
                report.bytes_freed += candidate.size_bytes;
                projected_used = projected_used.saturating_sub(candidate.size_bytes);
                self.notify(&DeletedFile {
                    path: candidate.path,
                    size_bytes: candidate.size_bytes,
                    modified: candidate.modified,
                });
            }

            if options.remove_empty_dirs && !options.dry_run && report.files_deleted > 0 {
                report.dirs_removed = prune_empty_dirs(root, root);
            }
        }

        report.target_reached = projected_used <= target_used;
        report.duration = start.elapsed();
        Ok(report)
    }
}

fn resolve_target(root: &Path, options: &ReclaimOptions) -> Result<f64> {
    let pct = options.max_usage_percent.ok_or_else(|| SsbError::Reclaim {
        root: root.to_path_buf(),
        details: "max_usage_percent is required".to_string(),
    })?;
    if !pct.is_finite() || !(0.0..=100.0).contains(&pct) {
        return Err(SsbError::Reclaim {
            root: root.to_path_buf(),
            details: format!("max_usage_percent must be in [0, 100], got {pct}"),
        });
    }
    Ok(pct)
}

fn compile_patterns(root: &Path, patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| SsbError::Reclaim {
                root: root.to_path_buf(),
                details: format!("invalid protect pattern {p:?}: {e}"),
            })
        })
        .collect()
}

/// Walk `root` without following symlinks. Unreadable subdirectories are
/// recorded as failures; an unreadable root is an error.
fn collect_candidates(
    root: &Path,
    protect: &[Regex],
    min_age: Duration,
    report: &mut ReclaimReport,
) -> Result<Vec<Candidate>> {
    let now = SystemTime::now();
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if dir == root => return Err(SsbError::io(root, e)),
            Err(e) => {
                report.errors.push(ReclaimFailure {
                    path: dir,
                    error: e.to_string(),
                });
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(meta) = fs::symlink_metadata(&path) else {
                continue;
            };
            if meta.is_dir() {
                stack.push(path);
                continue;
            }
            if !meta.is_file() {
                continue;
            }

            let rel = relative_key(root, &path);
            if protect.iter().any(|re| re.is_match(&rel)) {
                report.files_skipped += 1;
                continue;
            }
            let modified = meta.modified().unwrap_or(now);
            if now.duration_since(modified).unwrap_or(Duration::ZERO) < min_age {
                report.files_skipped += 1;
                continue;
            }
            out.push(Candidate {
                path,
                size_bytes: meta.len(),
                modified,
            });
        }
    }

    Ok(out)
}

fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Remove empty directories below `dir`, deepest first. Returns how many went.
fn prune_empty_dirs(root: &Path, dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if fs::symlink_metadata(&path).is_ok_and(|m| m.is_dir()) {
            removed += prune_empty_dirs(root, &path);
        }
    }
    if dir != root && fs::remove_dir(dir).is_ok() {
        removed += 1;
    }
    removed
}
