//! JSONL activity log: one self-contained JSON object per line.
//!
//! Lines are assembled in memory and written with a single `write_all` so a
//! concurrent `tail -f` never sees a partial record. When the primary file
//! cannot be written the writer degrades: fallback file, then stderr with an
//! `[SSB-JSONL]` prefix, then silent discard. Logging never fails a backup.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SsbError};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Event kinds recorded in the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionOpen,
    SessionClose,
    CapacityCheck,
    ProbeFailure,
    CleanupStart,
    CleanupFinish,
    CleanupFailure,
    FileSaved,
    UploadFailure,
    Error,
}

/// A single JSONL record. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp with millisecond precision.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Destination root or remote prefix the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_usage_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            root: None,
            path: None,
            size: None,
            free_bytes: None,
            total_bytes: None,
            target_usage_pct: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sink {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Used when the primary path cannot be opened or written.
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the active file would exceed this many bytes. Default: 16 MiB.
    pub max_size_bytes: u64,
    /// Rotated generations to keep (`.1` newest). Default: 3.
    pub max_rotated_files: u32,
    /// Seconds between forced `sync_data` calls. Default: 10.
    pub fsync_interval_secs: u64,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: std::env::temp_dir().join("ssb").join("activity.jsonl"),
            fallback_path: None,
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 10,
        }
    }
}

/// Append-only JSONL writer with size rotation and a degradation chain.
pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    sink: Sink,
    bytes_written: u64,
    last_fsync: Instant,
}

impl JsonlWriter {
    /// Open the log, falling through the degradation chain on failure.
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            writer: None,
            sink: Sink::Discard,
            bytes_written: 0,
            last_fsync: Instant::now(),
        };
        writer.open_primary();
        writer
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(json) => self.write_line(&format!("{json}\n")),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[SSB-JSONL] serialize error: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    pub fn fsync(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
            let _ = w.get_ref().sync_data();
        }
        self.last_fsync = Instant::now();
    }

    /// Current sink name: `primary`, `fallback`, `stderr` or `discard`.
    pub fn state(&self) -> &'static str {
        match self.sink {
            Sink::Primary => "primary",
            Sink::Fallback => "fallback",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if matches!(self.sink, Sink::Primary | Sink::Fallback)
            && self.bytes_written > 0
            && self.bytes_written + len > self.config.max_size_bytes
        {
            self.rotate();
        }

        match self.sink {
            Sink::Primary | Sink::Fallback => {
                let written = self
                    .writer
                    .as_mut()
                    .is_some_and(|w| w.write_all(line.as_bytes()).is_ok());
                if written {
                    self.bytes_written += len;
                    if self.last_fsync.elapsed().as_secs() >= self.config.fsync_interval_secs {
                        self.fsync();
                    }
                } else {
                    self.degrade();
                    self.write_line(line);
                }
            }
            Sink::Stderr => {
                let _ = write!(io::stderr(), "[SSB-JSONL] {line}");
            }
            Sink::Discard => {}
        }
    }

    fn open_primary(&mut self) {
        if let Ok((file, size)) = open_append(&self.config.path) {
            self.attach(file, size, Sink::Primary);
        } else {
            self.open_fallback();
        }
    }

    fn open_fallback(&mut self) {
        let opened = self
            .config
            .fallback_path
            .clone()
            .and_then(|fb| open_append(&fb).ok().map(|handle| (fb, handle)));
        if let Some((fb, (file, size))) = opened {
            let _ = writeln!(
                io::stderr(),
                "[SSB-JSONL] primary log unavailable, using fallback: {}",
                fb.display()
            );
            self.attach(file, size, Sink::Fallback);
        } else {
            self.writer = None;
            self.sink = Sink::Stderr;
            let _ = writeln!(io::stderr(), "[SSB-JSONL] log files unavailable, using stderr");
        }
    }

    fn attach(&mut self, file: File, size: u64, sink: Sink) {
        self.writer = Some(BufWriter::with_capacity(64 * 1024, file));
        self.sink = sink;
        self.bytes_written = size;
    }

    fn degrade(&mut self) {
        self.writer = None;
        match self.sink {
            Sink::Primary => self.open_fallback(),
            Sink::Fallback => self.sink = Sink::Stderr,
            Sink::Stderr | Sink::Discard => self.sink = Sink::Discard,
        }
    }

    fn rotate(&mut self) {
        self.flush();
        self.writer = None;
        let base = match self.sink {
            Sink::Primary => self.config.path.clone(),
            Sink::Fallback => match &self.config.fallback_path {
                Some(p) => p.clone(),
                None => return,
            },
            Sink::Stderr | Sink::Discard => return,
        };

        let keep = self.config.max_rotated_files.max(1);
        let _ = fs::remove_file(rotated_name(&base, keep));
        for generation in (1..keep).rev() {
            let _ = fs::rename(
                rotated_name(&base, generation),
                rotated_name(&base, generation + 1),
            );
        }
        let _ = fs::rename(&base, rotated_name(&base, 1));

        match open_append(&base) {
            Ok((file, _)) => {
                let sink = self.sink;
                self.attach(file, 0, sink);
            }
            Err(_) => self.degrade(),
        }
    }
}

/// Open or create a file for appending. Returns `(File, current_size)`.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| SsbError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| SsbError::io(path, source))?;
    let size = file.metadata().map_or(0, |m| m.len());
    Ok((file, size))
}

/// `activity.jsonl` → `activity.jsonl.2`.
fn rotated_name(base: &Path, generation: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
