//! Local-copy backup session.
//!
//! Saves are synchronous: when `save` returns `Ok` the bytes are on disk under
//! the destination root with the source's permission bits. Each copy goes
//! through a hidden sibling temp file that is fsynced and renamed into place,
//! so a reader never sees a half-written destination.

use std::fs::{self, File, Permissions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use sha2::{Digest, Sha256};

use crate::core::config::SessionConfig;
use crate::core::errors::{Result, SsbError};
use crate::logger::activity::ActivityEvent;
use crate::session::barrier::CancelToken;
use crate::session::coordinator::{CapacityCoordinator, Collaborators};
use crate::session::{BackupSession, SessionStats, checked_relative, checked_source};

const COPY_BUF_SIZE: usize = 64 * 1024;

pub struct LocalBackupSession {
    coordinator: Arc<CapacityCoordinator>,
    verify_copies: bool,
    closed: AtomicBool,
    files_saved: AtomicU64,
    bytes_saved: AtomicU64,
}

impl LocalBackupSession {
    /// Validate `config`, create the root if needed, and run the bootstrap check.
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.root).map_err(|e| SsbError::io(&config.root, e))?;
        let coordinator = CapacityCoordinator::start(&config, collaborators)?;
        Ok(Self {
            coordinator,
            verify_copies: config.verify_copies,
            closed: AtomicBool::new(false),
            files_saved: AtomicU64::new(0),
            bytes_saved: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        self.coordinator.root()
    }

    pub fn coordinator(&self) -> &Arc<CapacityCoordinator> {
        &self.coordinator
    }
}

impl BackupSession for LocalBackupSession {
    fn save(&self, source: &Path, relative_destination: &str) -> Result<()> {
        let meta = checked_source(source)?;
        let relative = checked_relative(relative_destination)?;
        if self.closed.load(Ordering::Acquire) {
            return Err(SsbError::invalid_input("session is closed"));
        }

        let destination = self.coordinator.root().join(relative);
        let written = copy_durably(source, &destination, meta.permissions(), self.verify_copies)?;

        self.files_saved.fetch_add(1, Ordering::Relaxed);
        self.bytes_saved.fetch_add(written, Ordering::Relaxed);
        self.coordinator.emit(ActivityEvent::FileSaved {
            destination: destination.display().to_string(),
            size_bytes: written,
        });
        self.coordinator.record_saved(written);
        Ok(())
    }

    fn wait_until(&self, deadline: Option<Instant>, cancel: Option<&CancelToken>) -> Result<()> {
        self.coordinator.wait(deadline, cancel)
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.coordinator.emit(ActivityEvent::SessionClosed {
                root: self.coordinator.root_label(),
                outstanding: self.coordinator.outstanding(),
            });
        }
        Ok(())
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            files_saved: self.files_saved.load(Ordering::Relaxed),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
            accumulated_bytes: self.coordinator.accumulated_bytes(),
            passes_started: self.coordinator.passes_started(),
            passes_completed: self.coordinator.passes_completed(),
            outstanding: self.coordinator.outstanding(),
            cleaning: self.coordinator.cleaning_state(),
            transfer_failures: 0,
        }
    }
}

/// Copy `source` to `destination` via a temp sibling. Returns bytes written.
fn copy_durably(
    source: &Path,
    destination: &Path,
    permissions: Permissions,
    verify: bool,
) -> Result<u64> {
    let backup_err = |details: String| SsbError::BackupFailed {
        path: destination.to_path_buf(),
        details,
    };

    let parent = destination
        .parent()
        .ok_or_else(|| backup_err("destination has no parent directory".to_string()))?;
    fs::create_dir_all(parent).map_err(|e| SsbError::io(parent, e))?;

    let staging = staging_path(destination);
    let result = write_staged(source, &staging, permissions)
        .map_err(|e| backup_err(format!("copy from {} failed: {e}", source.display())))
        .and_then(|(written, source_digest)| {
            if verify {
                let copied = sha256_file(&staging).map_err(|e| backup_err(e.to_string()))?;
                if copied != source_digest {
                    return Err(backup_err(format!(
                        "checksum mismatch: source {source_digest}, copy {copied}"
                    )));
                }
            }
            fs::rename(&staging, destination).map_err(|e| backup_err(e.to_string()))?;
            Ok(written)
        });

    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result
}

fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
    let nonce: u32 = rand::random();
    destination.with_file_name(format!(".{name}.ssb-{nonce:08x}.tmp"))
}

/// Stream `source` into `staging`, hashing as it goes, then set permissions and fsync.
fn write_staged(source: &Path, staging: &Path, permissions: Permissions) -> io::Result<(u64, String)> {
    let mut input = File::open(source)?;
    let mut output = File::create(staging)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut written = 0u64;
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        output.write_all(&buf[..n])?;
        written += n as u64;
    }
    output.set_permissions(permissions)?;
    output.sync_all()?;
    Ok((written, format!("{:x}", hasher.finalize())))
}

fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
