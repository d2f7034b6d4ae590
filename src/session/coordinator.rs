//! Capacity coordination shared by every destination-specific session.
//!
//! The coordinator owns the three pieces of per-session state that concurrent
//! saves touch: the [`SizeAccumulator`], the [`CleaningTrigger`] and the
//! [`CompletionBarrier`]. Save paths report bytes through
//! [`CapacityCoordinator::record_saved`]; once the running total crosses the
//! check interval, a fresh capacity probe decides whether a cleanup pass is
//! dispatched onto its own thread.
//!
//! Probe and engine failures never leave this module as errors. They are
//! reported on the activity event stream and the session keeps going.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use crate::core::config::SessionConfig;
use crate::core::errors::{Result, SsbError};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::platform::pal::{CapacityProbe, DiskUsage, StatvfsProbe};
use crate::reclaim::age_ordered::AgeOrderedReclaimer;
use crate::reclaim::{ReclaimEngine, ReclaimOptions};
use crate::session::accumulator::SizeAccumulator;
use crate::session::barrier::{CancelToken, CompletionBarrier, WorkGuard};
use crate::session::trigger::{CleaningState, CleaningTrigger, TriggerOutcome};

/// External services a capacity-managed session depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub probe: Arc<dyn CapacityProbe>,
    pub engine: Arc<dyn ReclaimEngine>,
    pub events: Option<ActivityLoggerHandle>,
}

impl Collaborators {
    pub fn new(probe: Arc<dyn CapacityProbe>, engine: Arc<dyn ReclaimEngine>) -> Self {
        Self {
            probe,
            engine,
            events: None,
        }
    }

    /// statvfs probe plus the age-ordered engine, both reading the same probe.
    #[must_use]
    pub fn system() -> Self {
        let probe: Arc<dyn CapacityProbe> = Arc::new(StatvfsProbe::new());
        let engine = Arc::new(AgeOrderedReclaimer::new(Arc::clone(&probe)));
        Self::new(probe, engine)
    }

    #[must_use]
    pub fn with_events(mut self, events: ActivityLoggerHandle) -> Self {
        self.events = Some(events);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("events", &self.events.is_some())
            .finish_non_exhaustive()
    }
}

/// Usage percentage that leaves `target_free_space` bytes free on a volume of
/// `total` bytes. Clamped to `[0, 100]`; a zero-sized volume yields 0.
#[must_use]
pub fn target_usage_percent(total: u64, target_free_space: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let desired_used = total.saturating_sub(target_free_space);
    #[allow(clippy::cast_precision_loss)]
    let pct = desired_used as f64 / total as f64 * 100.0;
    pct.clamp(0.0, 100.0)
}

pub struct CapacityCoordinator {
    root: PathBuf,
    free_space_threshold: u64,
    target_free_space: u64,
    check_interval: u64,
    reclaim: ReclaimOptions,
    probe: Arc<dyn CapacityProbe>,
    engine: Arc<dyn ReclaimEngine>,
    events: Option<ActivityLoggerHandle>,
    accumulator: SizeAccumulator,
    trigger: CleaningTrigger,
    barrier: Arc<CompletionBarrier>,
    passes_started: AtomicU64,
    passes_completed: AtomicU64,
}

impl std::fmt::Debug for CapacityCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapacityCoordinator")
            .field("root", &self.root)
            .field("free_space_threshold", &self.free_space_threshold)
            .field("target_free_space", &self.target_free_space)
            .field("check_interval", &self.check_interval)
            .finish_non_exhaustive()
    }
}

impl CapacityCoordinator {
    /// Validate `config`, then run the bootstrap capacity check.
    ///
    /// When the root is already below the free-space threshold a cleanup pass
    /// is running by the time this returns. A failing probe is reported on the
    /// event stream and does not fail construction.
    pub fn start(config: &SessionConfig, collaborators: Collaborators) -> Result<Arc<Self>> {
        config.validate()?;
        let coordinator = Arc::new(Self {
            root: config.root.clone(),
            free_space_threshold: config.free_space_threshold,
            target_free_space: config.target_free_space,
            check_interval: config.effective_check_interval(),
            reclaim: config.reclaim.clone(),
            probe: collaborators.probe,
            engine: collaborators.engine,
            events: collaborators.events,
            accumulator: SizeAccumulator::new(),
            trigger: CleaningTrigger::new(),
            barrier: CompletionBarrier::new(),
            passes_started: AtomicU64::new(0),
            passes_completed: AtomicU64::new(0),
        });

        let (outcome, usage) = coordinator.run_check();
        coordinator.emit(ActivityEvent::SessionOpened {
            root: coordinator.root_label(),
            free_bytes: usage.map(|u| u.free),
            total_bytes: usage.map(|u| u.total),
            cleanup_started: outcome.started(),
        });
        Ok(coordinator)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn check_interval(&self) -> u64 {
        self.check_interval
    }

    /// Account for `bytes` just written and check capacity once the running
    /// total reaches the check interval. Never blocks on a cleanup pass.
    pub fn record_saved(self: &Arc<Self>, bytes: u64) -> Option<TriggerOutcome> {
        let total = self.accumulator.add(bytes);
        (total >= self.check_interval).then(|| self.check_and_maybe_clean())
    }

    /// Probe capacity and start a cleanup pass if free space is below the threshold.
    pub fn check_and_maybe_clean(self: &Arc<Self>) -> TriggerOutcome {
        let (outcome, usage) = self.run_check();
        if let Some(usage) = usage {
            self.emit(ActivityEvent::CapacityChecked {
                root: self.root_label(),
                free_bytes: usage.free,
                total_bytes: usage.total,
                threshold_bytes: self.free_space_threshold,
                cleanup_started: outcome.started(),
            });
        }
        outcome
    }

    /// Block until all registered work has finished. See [`CompletionBarrier::wait`].
    pub fn wait(&self, deadline: Option<Instant>, cancel: Option<&CancelToken>) -> Result<()> {
        self.barrier.wait(deadline, cancel)
    }

    /// Register a unit of background work owned by the caller.
    pub fn register_work(&self) -> WorkGuard {
        self.barrier.register()
    }

    #[must_use]
    pub fn accumulated_bytes(&self) -> u64 {
        self.accumulator.load()
    }

    #[must_use]
    pub fn cleaning_state(&self) -> CleaningState {
        self.trigger.state()
    }

    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.barrier.pending()
    }

    #[must_use]
    pub fn passes_started(&self) -> u64 {
        self.passes_started.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn passes_completed(&self) -> u64 {
        self.passes_completed.load(Ordering::Relaxed)
    }

    pub(crate) fn emit(&self, event: ActivityEvent) {
        if let Some(events) = &self.events {
            events.send(event);
        }
    }

    pub(crate) fn root_label(&self) -> String {
        self.root.display().to_string()
    }

    fn run_check(self: &Arc<Self>) -> (TriggerOutcome, Option<DiskUsage>) {
        let mut observed = None;
        let outcome = self.trigger.try_start(
            || {
                let usage = self.probe.disk_usage(&self.root)?;
                observed = Some(usage);
                Ok(usage.free < self.free_space_threshold)
            },
            || self.dispatch_pass(),
        );

        match &outcome {
            TriggerOutcome::CheckFailed(err) => self.emit(ActivityEvent::ProbeFailed {
                root: self.root_label(),
                error_code: err.code().to_string(),
                message: err.to_string(),
            }),
            TriggerOutcome::DispatchFailed(err) => {
                eprintln!("[SSB-SESSION] could not start cleanup pass: {err}");
            }
            _ => {}
        }
        (outcome, observed)
    }

    /// Runs under the trigger lock with the state already `Active`.
    fn dispatch_pass(self: &Arc<Self>) -> Result<()> {
        let work = self.barrier.register();
        let coordinator = Arc::clone(self);
        self.passes_started.fetch_add(1, Ordering::Relaxed);

        let spawned = thread::Builder::new()
            .name("ssb-cleanup".to_string())
            .spawn(move || {
                let pass = PassCompletion {
                    coordinator,
                    _work: work,
                };
                pass.coordinator.run_pass();
            });

        match spawned {
            Ok(_) => Ok(()),
            Err(e) => {
                self.passes_started.fetch_sub(1, Ordering::Relaxed);
                Err(SsbError::Runtime {
                    details: format!("failed to spawn cleanup thread: {e}"),
                })
            }
        }
    }

    fn run_pass(&self) {
        let started = Instant::now();
        let elapsed_ms = || u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let usage = match self.probe.disk_usage(&self.root) {
            Ok(usage) => usage,
            Err(err) => {
                self.emit(ActivityEvent::CleanupFailed {
                    root: self.root_label(),
                    error_code: err.code().to_string(),
                    message: err.to_string(),
                    duration_ms: elapsed_ms(),
                });
                return;
            }
        };
        self.emit(ActivityEvent::CleanupStarted {
            root: self.root_label(),
            free_bytes: usage.free,
            total_bytes: usage.total,
        });

        let target_pct = self
            .reclaim
            .max_usage_percent
            .unwrap_or_else(|| target_usage_percent(usage.total, self.target_free_space));
        let options = ReclaimOptions {
            max_usage_percent: Some(target_pct),
            ..self.reclaim.clone()
        };

        match self.engine.clean(&self.root, &options) {
            Ok(report) => self.emit(ActivityEvent::CleanupFinished {
                root: self.root_label(),
                target_usage_pct: target_pct,
                files_deleted: report.files_deleted,
                bytes_freed: report.bytes_freed,
                target_reached: report.target_reached,
                duration_ms: elapsed_ms(),
            }),
            Err(err) => self.emit(ActivityEvent::CleanupFailed {
                root: self.root_label(),
                error_code: err.code().to_string(),
                message: err.to_string(),
                duration_ms: elapsed_ms(),
            }),
        }
    }
}

/// Ends a cleanup pass on every exit path, panics included.
///
/// Order matters: `Idle`, then the accumulator reset, then the work guard
/// field drops and releases the barrier.
struct PassCompletion {
    coordinator: Arc<CapacityCoordinator>,
    _work: WorkGuard,
}

impl Drop for PassCompletion {
    fn drop(&mut self) {
        self.coordinator.trigger.finish();
        self.coordinator.accumulator.reset();
        self.coordinator.passes_completed.fetch_add(1, Ordering::Relaxed);
    }
}
