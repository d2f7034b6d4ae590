//! Remote (object store) backup session.
//!
//! `save` validates its input, registers the upload with the completion
//! barrier and queues it for a small pool of upload threads; it returns as
//! soon as the job is queued. Upload failures cannot reach the `save` caller,
//! so they are kept in [`RemoteBackupSession::transfer_failures`] and sent on
//! the activity event stream.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::core::config::RemoteConfig;
use crate::core::errors::{Result, SsbError};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::session::barrier::{CancelToken, CompletionBarrier, WorkGuard};
use crate::session::{BackupSession, CleaningState, SessionStats, checked_relative, checked_source};
use crate::transport::{ObjectAcl, ObjectTransport, PutOptions, object_key};

/// A background upload that did not make it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferFailure {
    pub key: String,
    pub source: PathBuf,
    pub error_code: &'static str,
    pub message: String,
}

struct UploadJob {
    key: String,
    source: PathBuf,
    size: u64,
    _work: WorkGuard,
}

/// State shared between the session and its upload threads.
struct UploadShared {
    transport: Arc<dyn ObjectTransport>,
    options: PutOptions,
    failures: Mutex<Vec<TransferFailure>>,
    bytes_uploaded: AtomicU64,
    events: Option<ActivityLoggerHandle>,
}

pub struct RemoteBackupSession {
    bucket: String,
    prefix: String,
    shared: Arc<UploadShared>,
    queue: RwLock<Option<Sender<UploadJob>>>,
    barrier: Arc<CompletionBarrier>,
    closed: AtomicBool,
    files_saved: AtomicU64,
}

impl RemoteBackupSession {
    /// Validate `config`, confirm the bucket is reachable, and start the upload pool.
    pub fn new(config: &RemoteConfig, transport: Arc<dyn ObjectTransport>) -> Result<Self> {
        Self::with_events(config, transport, None)
    }

    pub fn with_events(
        config: &RemoteConfig,
        transport: Arc<dyn ObjectTransport>,
        events: Option<ActivityLoggerHandle>,
    ) -> Result<Self> {
        config.validate()?;
        let acl: ObjectAcl = config.object_acl()?;
        transport.check_bucket()?;

        let shared = Arc::new(UploadShared {
            transport,
            options: PutOptions { acl },
            failures: Mutex::new(Vec::new()),
            bytes_uploaded: AtomicU64::new(0),
            events,
        });

        let (tx, rx) = unbounded::<UploadJob>();
        for n in 0..config.upload_workers.max(1) {
            let rx = rx.clone();
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("ssb-upload-{n}"))
                .spawn(move || upload_worker(&rx, &shared))
                .map_err(|e| SsbError::Runtime {
                    details: format!("failed to spawn upload thread: {e}"),
                })?;
        }

        Ok(Self {
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
            shared,
            queue: RwLock::new(Some(tx)),
            barrier: CompletionBarrier::new(),
            closed: AtomicBool::new(false),
            files_saved: AtomicU64::new(0),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    #[must_use]
    pub fn acl(&self) -> ObjectAcl {
        self.shared.options.acl
    }

    /// Object key a relative destination maps to.
    #[must_use]
    pub fn key_for(&self, relative_destination: &str) -> String {
        object_key(&self.prefix, relative_destination)
    }

    /// Failed background uploads so far, oldest first.
    #[must_use]
    pub fn transfer_failures(&self) -> Vec<TransferFailure> {
        self.shared.failures.lock().clone()
    }

    #[must_use]
    pub fn bytes_uploaded(&self) -> u64 {
        self.shared.bytes_uploaded.load(Ordering::Relaxed)
    }
}

impl BackupSession for RemoteBackupSession {
    fn save(&self, source: &Path, relative_destination: &str) -> Result<()> {
        let meta = checked_source(source)?;
        checked_relative(relative_destination)?;

        let queue = self.queue.read();
        let Some(tx) = queue.as_ref() else {
            return Err(SsbError::invalid_input("session is closed"));
        };

        let job = UploadJob {
            key: self.key_for(relative_destination),
            source: source.to_path_buf(),
            size: meta.len(),
            _work: self.barrier.register(),
        };
        tx.send(job).map_err(|_| SsbError::BackupFailed {
            path: source.to_path_buf(),
            details: "upload queue is closed".to_string(),
        })?;
        self.files_saved.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn wait_until(&self, deadline: Option<Instant>, cancel: Option<&CancelToken>) -> Result<()> {
        self.barrier.wait(deadline, cancel)
    }

    /// Drops the queue sender; workers drain what is already queued and exit.
    fn close(&self) -> Result<()> {
        let sender = self.queue.write().take();
        if sender.is_some() && !self.closed.swap(true, Ordering::AcqRel) {
            self.shared.emit(ActivityEvent::SessionClosed {
                root: format!("{}/{}", self.bucket, self.prefix),
                outstanding: self.barrier.pending(),
            });
        }
        Ok(())
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            files_saved: self.files_saved.load(Ordering::Relaxed),
            bytes_saved: self.bytes_uploaded(),
            accumulated_bytes: 0,
            passes_started: 0,
            passes_completed: 0,
            outstanding: self.barrier.pending(),
            cleaning: CleaningState::Idle,
            transfer_failures: self.shared.failures.lock().len(),
        }
    }
}

impl Drop for RemoteBackupSession {
    fn drop(&mut self) {
        self.queue.get_mut().take();
    }
}

impl UploadShared {
    fn emit(&self, event: ActivityEvent) {
        if let Some(events) = &self.events {
            events.send(event);
        }
    }

    fn upload(&self, job: &UploadJob) -> Result<()> {
        let file = File::open(&job.source).map_err(|e| SsbError::io(&job.source, e))?;
        let mut reader = BufReader::new(file);
        self.transport
            .put(&job.key, &mut reader, job.size, &self.options)
    }

    fn record_failure(&self, job: &UploadJob, err: &SsbError) {
        self.emit(ActivityEvent::UploadFailed {
            key: job.key.clone(),
            error_code: err.code().to_string(),
            message: err.to_string(),
        });
        self.failures.lock().push(TransferFailure {
            key: job.key.clone(),
            source: job.source.clone(),
            error_code: err.code(),
            message: err.to_string(),
        });
    }
}

fn upload_worker(rx: &Receiver<UploadJob>, shared: &UploadShared) {
    // The job's work guard drops at the end of each iteration, after the
    // outcome is recorded.
    while let Ok(job) = rx.recv() {
        match shared.upload(&job) {
            Ok(()) => {
                shared.bytes_uploaded.fetch_add(job.size, Ordering::Relaxed);
                shared.emit(ActivityEvent::FileSaved {
                    destination: job.key.clone(),
                    size_bytes: job.size,
                });
            }
            Err(err) => shared.record_failure(&job, &err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::time::Duration;

    /// Transport that keeps objects in memory and fails keys containing "fail".
    #[derive(Default)]
    struct MemoryTransport {
        objects: Mutex<Vec<(String, Vec<u8>, ObjectAcl)>>,
        bucket_missing: bool,
    }

    impl ObjectTransport for MemoryTransport {
        fn check_bucket(&self) -> Result<()> {
            if self.bucket_missing {
                return Err(SsbError::Transport {
                    key: String::new(),
                    details: "no such bucket".to_string(),
                });
            }
            Ok(())
        }

        fn put(&self, key: &str, body: &mut dyn Read, _size: u64, options: &PutOptions) -> Result<()> {
            if key.contains("fail") {
                return Err(SsbError::Transport {
                    key: key.to_string(),
                    details: "refused".to_string(),
                });
            }
            let mut data = Vec::new();
            body.read_to_end(&mut data)
                .map_err(|e| SsbError::io(key, e))?;
            self.objects.lock().push((key.to_string(), data, options.acl));
            Ok(())
        }
    }

    fn config() -> RemoteConfig {
        RemoteConfig {
            prefix: "nightly".to_string(),
            acl: "authenticated-read".to_string(),
            ..RemoteConfig::new("bucket")
        }
    }

    #[test]
    fn construction_checks_bucket_and_acl() {
        let missing = Arc::new(MemoryTransport {
            bucket_missing: true,
            ..MemoryTransport::default()
        });
        assert_eq!(
            RemoteBackupSession::new(&config(), missing).err().map(|e| e.code()),
            Some("SSB-3003")
        );

        let bad_acl = RemoteConfig {
            acl: "public".to_string(),
            ..config()
        };
        let err = RemoteBackupSession::new(&bad_acl, Arc::new(MemoryTransport::default()))
            .err()
            .expect("bad acl");
        assert_eq!(err.code(), "SSB-1001");
    }

    #[test]
    fn uploads_run_in_background_and_record_failures() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.txt");
        let bad = dir.path().join("bad.txt");
        std::fs::write(&good, b"good").unwrap();
        std::fs::write(&bad, b"bad").unwrap();

        let transport = Arc::new(MemoryTransport::default());
        let (events, rx) = ActivityLoggerHandle::channel(16);
        let session =
            RemoteBackupSession::with_events(&config(), transport.clone(), Some(events)).unwrap();
        session.save(&good, "dir\\good.txt").unwrap();
        session.save(&bad, "will-fail.txt").unwrap();
        session.wait_for_completion(Duration::from_secs(10)).unwrap();

        let objects = transport.objects.lock().clone();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].0, "nightly/dir/good.txt");
        assert_eq!(objects[0].1, b"good");
        assert_eq!(objects[0].2, ObjectAcl::AuthenticatedRead);

        let failures = session.transfer_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "nightly/will-fail.txt");
        assert_eq!(failures[0].error_code, "SSB-3003");
        assert!(rx.try_iter().any(|e| matches!(e, ActivityEvent::UploadFailed { .. })));

        let stats = session.stats();
        assert_eq!(stats.files_saved, 2);
        assert_eq!(stats.bytes_saved, 4);
        assert_eq!(stats.transfer_failures, 1);
        assert_eq!(stats.outstanding, 0);
    }

    #[test]
    fn close_rejects_new_saves_but_drains_queue() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"a").unwrap();
        let transport = Arc::new(MemoryTransport::default());
        let session = RemoteBackupSession::new(&config(), transport.clone()).unwrap();
        session.save(&src, "a.txt").unwrap();
        session.close().unwrap();
        assert_eq!(session.save(&src, "b.txt").unwrap_err().code(), "SSB-1101");
        session.wait_for_completion(Duration::from_secs(10)).unwrap();
        assert_eq!(transport.objects.lock().len(), 1);
    }

    #[test]
    fn empty_source_never_queues() {
        let session =
            RemoteBackupSession::new(&config(), Arc::new(MemoryTransport::default())).unwrap();
        assert_eq!(session.save(Path::new(""), "x").unwrap_err().code(), "SSB-1101");
        assert_eq!(session.stats().outstanding, 0);
        assert_eq!(session.stats().files_saved, 0);
    }
}
