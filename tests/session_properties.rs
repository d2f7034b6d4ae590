//! Session-level behavior: accounting, single-flight cleanup, bootstrap,
//! completion waits, and local round-trips.

mod common;

use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use common::{ScriptedEngine, write_file};
use storage_safe_backup::core::config::SessionConfig;
use storage_safe_backup::core::errors::SsbError;
use storage_safe_backup::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use storage_safe_backup::platform::pal::MockProbe;
use storage_safe_backup::session::coordinator::Collaborators;
use storage_safe_backup::session::local::LocalBackupSession;
use storage_safe_backup::session::{BackupSession, CancelToken, CleaningState};

const WAIT: Duration = Duration::from_secs(10);

fn session_config(root: &Path, threshold: u64, target: u64, interval: u64) -> SessionConfig {
    SessionConfig {
        check_interval: interval,
        ..SessionConfig::new(root, threshold, target)
    }
}

fn open(
    root: &Path,
    threshold: u64,
    target: u64,
    interval: u64,
    probe: &Arc<MockProbe>,
    engine: &Arc<ScriptedEngine>,
) -> LocalBackupSession {
    LocalBackupSession::new(
        session_config(root, threshold, target, interval),
        Collaborators::new(probe.clone(), engine.clone()),
    )
    .expect("open session")
}

#[test]
fn concurrent_saves_lose_no_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(MockProbe::new(1 << 40, 1 << 39));
    let engine = ScriptedEngine::new(Arc::clone(&probe), 1 << 39);
    let session = Arc::new(open(&dir.path().join("root"), 10, 20, u64::MAX, &probe, &engine));

    let sizes: Vec<usize> = (1..=16).map(|n| n * 37).collect();
    let sources: Vec<_> = sizes
        .iter()
        .enumerate()
        .map(|(i, size)| write_file(dir.path(), &format!("src/{i}.bin"), &vec![b'x'; *size]))
        .collect();

    let handles: Vec<_> = sources
        .into_iter()
        .enumerate()
        .map(|(i, source)| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for round in 0..5 {
                    session.save(&source, &format!("t{i}/r{round}.bin")).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let expected: u64 = sizes.iter().map(|s| *s as u64 * 5).sum();
    let stats = session.stats();
    assert_eq!(stats.accumulated_bytes, expected);
    assert_eq!(stats.bytes_saved, expected);
    assert_eq!(stats.files_saved, 16 * 5);
}

#[test]
fn simultaneous_threshold_crossings_start_one_pass() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(MockProbe::new(1000, 500));
    let (engine, release) = ScriptedEngine::gated(Arc::clone(&probe), 800);
    let session = Arc::new(open(&dir.path().join("root"), 100, 200, 1, &probe, &engine));
    let source = write_file(dir.path(), "one.bin", b"z");

    probe.set_free(10);
    let gate = Arc::new(Barrier::new(24));
    let handles: Vec<_> = (0..24)
        .map(|i| {
            let session = Arc::clone(&session);
            let gate = Arc::clone(&gate);
            let source = source.clone();
            thread::spawn(move || {
                gate.wait();
                session.save(&source, &format!("f{i}.bin")).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = session.stats();
    assert_eq!(stats.passes_started, 1);
    assert_eq!(stats.cleaning, CleaningState::Active);
    assert_eq!(stats.outstanding, 1);

    drop(release);
    session.wait_for_completion(WAIT).unwrap();
    assert_eq!(engine.calls(), 1);
    assert_eq!(engine.max_running(), 1);
}

#[test]
fn bootstrap_pass_runs_before_any_save_and_wait_blocks_on_it() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(MockProbe::new(1000, 50));
    let (engine, release) = ScriptedEngine::gated(Arc::clone(&probe), 600);
    let session = open(&dir.path().join("root"), 100, 300, 1 << 30, &probe, &engine);

    let stats = session.stats();
    assert_eq!(stats.passes_started, 1);
    assert_eq!(stats.outstanding, 1);

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        drop(release);
    });
    let start = Instant::now();
    session.wait_for_completion(WAIT).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(40));
    releaser.join().unwrap();

    assert_eq!(probe.free(), 600);
    assert_eq!(session.stats().passes_completed, 1);
    let pct = engine.requested_pct.lock().clone();
    assert!((pct[0] - 70.0).abs() < 1e-9, "requested {pct:?}");
}

#[test]
fn pass_resets_state_after_success() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(MockProbe::new(1000, 500));
    let engine = ScriptedEngine::new(Arc::clone(&probe), 900);
    let session = open(&dir.path().join("root"), 100, 200, 4, &probe, &engine);
    let source = write_file(dir.path(), "four.bin", b"four");

    probe.set_free(50);
    session.save(&source, "a.bin").unwrap();
    session.wait_for_completion(WAIT).unwrap();

    let stats = session.stats();
    assert_eq!(stats.accumulated_bytes, 0);
    assert_eq!(stats.cleaning, CleaningState::Idle);
    assert_eq!(stats.passes_completed, 1);
}

#[test]
fn pass_resets_state_after_failure_and_waits_a_full_interval() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(MockProbe::new(1000, 500));
    let engine = ScriptedEngine::new(Arc::clone(&probe), 900);
    engine.set_failing(true);
    let (events, rx) = ActivityLoggerHandle::channel(256);
    let session = LocalBackupSession::new(
        session_config(&dir.path().join("root"), 100, 200, 8),
        Collaborators::new(probe.clone(), engine.clone()).with_events(events),
    )
    .unwrap();
    let source = write_file(dir.path(), "four.bin", b"four");

    probe.set_free(50);
    session.save(&source, "a.bin").unwrap();
    session.save(&source, "b.bin").unwrap();
    session.wait_for_completion(WAIT).unwrap();

    let stats = session.stats();
    assert_eq!(stats.accumulated_bytes, 0);
    assert_eq!(stats.cleaning, CleaningState::Idle);
    assert_eq!(engine.calls(), 1);
    assert!(rx.try_iter().any(|e| matches!(e, ActivityEvent::CleanupFailed { .. })));

    // Space is still short, but the next check waits for another interval.
    session.save(&source, "c.bin").unwrap();
    session.wait_for_completion(WAIT).unwrap();
    assert_eq!(engine.calls(), 1);
    session.save(&source, "d.bin").unwrap();
    session.wait_for_completion(WAIT).unwrap();
    assert_eq!(engine.calls(), 2);
}

#[test]
fn expired_deadline_times_out_immediately_with_work_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(MockProbe::new(1000, 10));
    let (engine, release) = ScriptedEngine::gated(Arc::clone(&probe), 900);
    let session = open(&dir.path().join("root"), 100, 200, 1, &probe, &engine);

    let start = Instant::now();
    let err = session
        .wait_until(Some(start), None)
        .expect_err("deadline already passed");
    assert!(matches!(err, SsbError::Timeout { pending: 1 }));
    assert!(start.elapsed() < Duration::from_millis(500));

    let err = session
        .wait_for_completion(Duration::ZERO)
        .expect_err("zero timeout");
    assert!(err.is_wait_expired());
    assert_eq!(session.stats().cleaning, CleaningState::Active);

    drop(release);
    session.wait_for_completion(WAIT).unwrap();
}

#[test]
fn cancelled_wait_leaves_work_running() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(MockProbe::new(1000, 10));
    let (engine, release) = ScriptedEngine::gated(Arc::clone(&probe), 900);
    let session = open(&dir.path().join("root"), 100, 200, 1, &probe, &engine);

    let token = CancelToken::new();
    token.cancel();
    let err = session.wait_until(None, Some(&token)).expect_err("cancelled");
    assert_eq!(err.code(), "SSB-4002");
    assert_eq!(session.stats().outstanding, 1);

    drop(release);
    session.wait_for_completion(WAIT).unwrap();
    assert_eq!(session.stats().passes_completed, 1);
}

#[test]
fn threshold_scenario_cleans_once_space_drops() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(MockProbe::new(100, 50));
    let engine = ScriptedEngine::new(Arc::clone(&probe), 25);
    let session = open(&dir.path().join("root"), 10, 20, 1, &probe, &engine);
    let unit = write_file(dir.path(), "unit.bin", b"u");

    session.save(&unit, "first.bin").unwrap();
    session.wait_for_completion(WAIT).unwrap();
    assert_eq!(engine.calls(), 0);
    assert_eq!(session.stats().passes_started, 0);

    probe.set_free(9);
    session.save(&unit, "second.bin").unwrap();
    assert_eq!(session.stats().passes_started, 1);

    session.wait_for_completion(WAIT).unwrap();
    assert_eq!(engine.calls(), 1);
    assert_eq!(probe.free(), 25);
    let pct = engine.requested_pct.lock().clone();
    assert!((pct[0] - 80.0).abs() < 1e-9, "requested {pct:?}");
}

#[test]
fn empty_source_is_rejected_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(MockProbe::new(100, 50));
    let engine = ScriptedEngine::new(Arc::clone(&probe), 50);
    let session = open(&dir.path().join("root"), 10, 20, 1, &probe, &engine);
    let probes_before = probe.calls();

    let err = session.save(Path::new(""), "x.bin").expect_err("empty path");
    assert!(matches!(err, SsbError::InvalidInput { .. }));
    let stats = session.stats();
    assert_eq!(stats.accumulated_bytes, 0);
    assert_eq!(stats.outstanding, 0);
    assert_eq!(probe.calls(), probes_before);
}

#[test]
fn probe_failures_never_reach_save() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(MockProbe::new(100, 50));
    let engine = ScriptedEngine::new(Arc::clone(&probe), 50);
    let session = open(&dir.path().join("root"), 10, 20, 1, &probe, &engine);
    let unit = write_file(dir.path(), "unit.bin", b"u");

    probe.set_failing(true);
    session.save(&unit, "a.bin").unwrap();
    session.save(&unit, "b.bin").unwrap();
    session.wait_for_completion(WAIT).unwrap();
    assert_eq!(engine.calls(), 0);
    assert_eq!(session.stats().accumulated_bytes, 2);
}

#[test]
fn construct_rejects_bad_thresholds() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(MockProbe::new(100, 50));
    let engine = ScriptedEngine::new(Arc::clone(&probe), 50);
    for (threshold, target) in [(0, 10), (10, 10), (20, 10)] {
        let result = LocalBackupSession::new(
            session_config(&dir.path().join("root"), threshold, target, 1),
            Collaborators::new(probe.clone(), engine.clone()),
        );
        assert_eq!(
            result.err().map(|e| e.code()),
            Some("SSB-1001"),
            "threshold={threshold} target={target}"
        );
    }
    assert!(!dir.path().join("root").exists());
}

#[test]
fn local_copy_preserves_content_and_permissions() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(MockProbe::new(1 << 30, 1 << 29));
    let engine = ScriptedEngine::new(Arc::clone(&probe), 1 << 29);
    let session = open(&dir.path().join("root"), 10, 20, 1 << 20, &probe, &engine);

    let content: Vec<u8> = (0..100_000u32).map(|n| (n % 251) as u8).collect();
    let source = write_file(dir.path(), "data/blob.bin", &content);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&source, fs::Permissions::from_mode(0o640)).unwrap();
    }

    session.save(&source, "copies/blob.bin").unwrap();
    let dest = dir.path().join("root/copies/blob.bin");
    assert_eq!(fs::read(&dest).unwrap(), content);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }
}

#[test]
fn sessions_in_one_process_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let probe_a = Arc::new(MockProbe::new(1000, 500));
    let probe_b = Arc::new(MockProbe::new(1000, 500));
    let engine_a = ScriptedEngine::new(Arc::clone(&probe_a), 900);
    let engine_b = ScriptedEngine::new(Arc::clone(&probe_b), 900);
    let a = open(&dir.path().join("a"), 100, 200, 1, &probe_a, &engine_a);
    let b = open(&dir.path().join("b"), 100, 200, 1, &probe_b, &engine_b);
    let unit = write_file(dir.path(), "unit.bin", b"u");

    probe_a.set_free(5);
    a.save(&unit, "x").unwrap();
    b.save(&unit, "x").unwrap();
    a.wait_for_completion(WAIT).unwrap();
    b.wait_for_completion(WAIT).unwrap();

    assert_eq!(engine_a.calls(), 1);
    assert_eq!(engine_b.calls(), 0);
    assert_eq!(b.stats().accumulated_bytes, 1);
}
