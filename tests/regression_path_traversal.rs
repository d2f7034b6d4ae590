//! Destinations must never resolve outside the session root or bucket.

mod common;

use std::sync::Arc;

use common::{ScriptedEngine, write_file};
use storage_safe_backup::core::config::{RemoteConfig, SessionConfig};
use storage_safe_backup::platform::pal::MockProbe;
use storage_safe_backup::session::coordinator::Collaborators;
use storage_safe_backup::session::local::LocalBackupSession;
use storage_safe_backup::session::remote::RemoteBackupSession;
use storage_safe_backup::session::BackupSession;
use storage_safe_backup::transport::directory::DirectoryObjectStore;
use storage_safe_backup::transport::{ObjectTransport, PutOptions};

const ESCAPES: [&str; 4] = ["../outside.txt", "a/../../outside.txt", "/tmp/outside.txt", ".."];

/// Destinations that resolve to the root itself or to a directory.
const NOT_A_FILE: [&str; 4] = [".", "./", "sub/.", "sub/"];

#[test]
fn local_session_rejects_escaping_destinations() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(MockProbe::new(1000, 900));
    let engine = ScriptedEngine::new(Arc::clone(&probe), 900);
    let session = LocalBackupSession::new(
        SessionConfig::new(dir.path().join("root"), 10, 20),
        Collaborators::new(probe, engine),
    )
    .unwrap();
    let source = write_file(dir.path(), "src.txt", b"secret");

    for dest in ESCAPES {
        let err = session.save(&source, dest).expect_err(dest);
        assert_eq!(err.code(), "SSB-1101", "{dest}");
    }
    assert!(!dir.path().join("outside.txt").exists());
    assert_eq!(session.stats().files_saved, 0);
}

#[test]
fn local_session_rejects_directory_destinations_without_touching_disk() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(MockProbe::new(1000, 900));
    let engine = ScriptedEngine::new(Arc::clone(&probe), 900);
    let root = dir.path().join("root");
    let session = LocalBackupSession::new(
        SessionConfig::new(root.clone(), 10, 20),
        Collaborators::new(probe, engine),
    )
    .unwrap();
    let source = write_file(dir.path(), "src.txt", b"secret");
    let before: Vec<_> = std::fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();

    for dest in NOT_A_FILE {
        let err = session.save(&source, dest).expect_err(dest);
        assert_eq!(err.code(), "SSB-1101", "{dest}");
    }
    let after: Vec<_> = std::fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
    assert_eq!(before.len(), after.len(), "no staging files next to the root");
    assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    assert_eq!(session.stats().accumulated_bytes, 0);
}

#[test]
fn remote_session_rejects_escaping_destinations() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryObjectStore::new(dir.path(), "bucket");
    store.create_bucket().unwrap();
    let session = RemoteBackupSession::new(&RemoteConfig::new("bucket"), Arc::new(store)).unwrap();
    let source = write_file(dir.path(), "src.txt", b"secret");

    for dest in ESCAPES {
        assert!(session.save(&source, dest).is_err(), "{dest}");
    }
    assert_eq!(session.stats().outstanding, 0);
}

#[test]
fn remote_session_rejects_directory_destinations_up_front() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryObjectStore::new(dir.path(), "bucket");
    store.create_bucket().unwrap();
    let session = RemoteBackupSession::new(&RemoteConfig::new("bucket"), Arc::new(store)).unwrap();
    let source = write_file(dir.path(), "src.txt", b"secret");

    for dest in NOT_A_FILE {
        let err = session.save(&source, dest).expect_err(dest);
        assert_eq!(err.code(), "SSB-1101", "{dest}");
    }
    session.wait_for_completion(std::time::Duration::from_secs(5)).unwrap();
    assert_eq!(session.stats().files_saved, 0);
    assert!(session.transfer_failures().is_empty());
}

#[test]
fn directory_store_rejects_escaping_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryObjectStore::new(dir.path().join("base"), "bucket");
    store.create_bucket().unwrap();

    for key in ["../escape", "nested/../../escape", "/abs/escape"] {
        let result = store.put(key, &mut &b"x"[..], 1, &PutOptions::default());
        assert!(result.is_err(), "{key}");
    }
    assert!(!dir.path().join("base/escape").exists());
    assert!(!dir.path().join("escape").exists());
}
