//! Activity event stream: the observability side channel of backup sessions.
//!
//! Sessions never surface capacity-management failures to `save` callers.
//! Instead they emit [`ActivityEvent`]s through a cloneable
//! [`ActivityLoggerHandle`]. The handle wraps a bounded crossbeam channel and
//! uses `try_send`, so a slow consumer can never stall the save path; events
//! that do not fit are counted and dropped.
//!
//! Consumers either spawn the JSONL logger thread ([`spawn_logger`]) or take
//! the raw receiver ([`ActivityLoggerHandle::channel`]).

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{Result, SsbError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Default bounded channel capacity for activity events.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Everything a session reports about its background behavior.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    SessionOpened {
        root: String,
        free_bytes: Option<u64>,
        total_bytes: Option<u64>,
        cleanup_started: bool,
    },
    SessionClosed {
        root: String,
        outstanding: usize,
    },
    CapacityChecked {
        root: String,
        free_bytes: u64,
        total_bytes: u64,
        threshold_bytes: u64,
        cleanup_started: bool,
    },
    ProbeFailed {
        root: String,
        error_code: String,
        message: String,
    },
    CleanupStarted {
        root: String,
        free_bytes: u64,
        total_bytes: u64,
    },
    CleanupFinished {
        root: String,
        target_usage_pct: f64,
        files_deleted: usize,
        bytes_freed: u64,
        target_reached: bool,
        duration_ms: u64,
    },
    CleanupFailed {
        root: String,
        error_code: String,
        message: String,
        duration_ms: u64,
    },
    FileSaved {
        destination: String,
        size_bytes: u64,
    },
    UploadFailed {
        key: String,
        error_code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

/// Thread-safe, cheaply-cloneable sender for activity events.
#[derive(Clone, Debug)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle plus the raw receiving end, for callers that consume events themselves.
    pub fn channel(capacity: usize) -> (Self, Receiver<ActivityEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Non-blocking send. A full channel drops the event and bumps the counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected means nobody is listening any more; that is fine.
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only if the channel is full.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

/// Spawn the JSONL logger thread.
///
/// Runs until [`ActivityLoggerHandle::shutdown`] is called or every handle is dropped.
pub fn spawn_logger(
    config: JsonlConfig,
    capacity: usize,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (handle, rx) = ActivityLoggerHandle::channel(capacity);
    let dropped = Arc::clone(&handle.dropped_events);

    let join = thread::Builder::new()
        .name("ssb-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config, &dropped))
        .map_err(|e| SsbError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{lost} activity events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if event == ActivityEvent::Shutdown {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.flush();
    jsonl.fsync();
}

/// Map an activity event onto its JSONL representation.
#[allow(clippy::too_many_lines)]
pub fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::SessionOpened {
            root,
            free_bytes,
            total_bytes,
            cleanup_started,
        } => {
            let mut e = LogEntry::new(EventType::SessionOpen, Severity::Info);
            e.root = Some(root.clone());
            e.free_bytes = *free_bytes;
            e.total_bytes = *total_bytes;
            e.details = Some(format!("eager_cleanup={cleanup_started}"));
            e
        }
        ActivityEvent::SessionClosed { root, outstanding } => {
            let mut e = LogEntry::new(EventType::SessionClose, Severity::Info);
            e.root = Some(root.clone());
            e.details = Some(format!("outstanding={outstanding}"));
            e
        }
        ActivityEvent::CapacityChecked {
            root,
            free_bytes,
            total_bytes,
            threshold_bytes,
            cleanup_started,
        } => {
            let mut e = LogEntry::new(EventType::CapacityCheck, Severity::Info);
            e.root = Some(root.clone());
            e.free_bytes = Some(*free_bytes);
            e.total_bytes = Some(*total_bytes);
            e.details = Some(format!(
                "threshold={threshold_bytes} cleanup_started={cleanup_started}"
            ));
            e
        }
        ActivityEvent::ProbeFailed {
            root,
            error_code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::ProbeFailure, Severity::Warning);
            e.root = Some(root.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::CleanupStarted {
            root,
            free_bytes,
            total_bytes,
        } => {
            let mut e = LogEntry::new(EventType::CleanupStart, Severity::Warning);
            e.root = Some(root.clone());
            e.free_bytes = Some(*free_bytes);
            e.total_bytes = Some(*total_bytes);
            e
        }
        ActivityEvent::CleanupFinished {
            root,
            target_usage_pct,
            files_deleted,
            bytes_freed,
            target_reached,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::CleanupFinish, Severity::Info);
            e.root = Some(root.clone());
            e.target_usage_pct = Some(*target_usage_pct);
            e.size = Some(*bytes_freed);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(*target_reached);
            e.details = Some(format!("files_deleted={files_deleted}"));
            e
        }
        ActivityEvent::CleanupFailed {
            root,
            error_code,
            message,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::CleanupFailure, Severity::Critical);
            e.root = Some(root.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(message.clone());
            e.duration_ms = Some(*duration_ms);
            e
        }
        ActivityEvent::FileSaved {
            destination,
            size_bytes,
        } => {
            let mut e = LogEntry::new(EventType::FileSaved, Severity::Info);
            e.path = Some(destination.clone());
            e.size = Some(*size_bytes);
            e.ok = Some(true);
            e
        }
        ActivityEvent::UploadFailed {
            key,
            error_code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::UploadFailure, Severity::Critical);
            e.path = Some(key.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::SessionClose, Severity::Info),
    }
}
