//! Single-flight guard for cleanup passes.
//!
//! The fast path is a lock-free read of the active flag. Only a caller that
//! sees `Idle` takes the mutex, re-checks, consults fresh capacity and, when
//! cleanup is warranted, flips to `Active` and dispatches the pass while
//! still holding the lock. The lock is never held while a pass runs.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::core::errors::{Result, SsbError};

/// Whether a cleanup pass is currently in flight for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleaningState {
    Idle,
    Active,
}

/// What a call to [`CleaningTrigger::try_start`] ended up doing.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// A pass was already running; nothing was checked.
    AlreadyActive,
    /// Capacity was checked and no pass is needed.
    NotNeeded,
    /// A new pass was dispatched.
    Started,
    /// The capacity check itself failed; no pass was started.
    CheckFailed(SsbError),
    /// The pass could not be dispatched; the trigger went back to idle.
    DispatchFailed(SsbError),
}

impl TriggerOutcome {
    #[must_use]
    pub const fn started(&self) -> bool {
        matches!(self, Self::Started)
    }
}

#[derive(Debug, Default)]
pub struct CleaningTrigger {
    active: AtomicBool,
    lock: Mutex<()>,
}

impl CleaningTrigger {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn state(&self) -> CleaningState {
        if self.is_active() {
            CleaningState::Active
        } else {
            CleaningState::Idle
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Double-checked start of a cleanup pass.
    ///
    /// `decide` runs under the lock and reports whether a pass is needed.
    /// `dispatch` runs under the lock after the state is already `Active`;
    /// it must hand the work off and return promptly.
    pub fn try_start<C, D>(&self, decide: C, dispatch: D) -> TriggerOutcome
    where
        C: FnOnce() -> Result<bool>,
        D: FnOnce() -> Result<()>,
    {
        if self.is_active() {
            return TriggerOutcome::AlreadyActive;
        }

        let _guard = self.lock.lock();
        if self.is_active() {
            return TriggerOutcome::AlreadyActive;
        }

        match decide() {
            Ok(false) => TriggerOutcome::NotNeeded,
            Err(err) => TriggerOutcome::CheckFailed(err),
            Ok(true) => {
                self.active.store(true, Ordering::Release);
                match dispatch() {
                    Ok(()) => TriggerOutcome::Started,
                    Err(err) => {
                        self.active.store(false, Ordering::Release);
                        TriggerOutcome::DispatchFailed(err)
                    }
                }
            }
        }
    }

    /// Return to `Idle`. Called by the pass itself when it ends, on every path.
    pub fn finish(&self) {
        self.active.store(false, Ordering::Release);
    }
}
