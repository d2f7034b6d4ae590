#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, Sender, bounded};
use storage_safe_backup::core::errors::{Result, SsbError};
use storage_safe_backup::platform::pal::MockProbe;
use storage_safe_backup::reclaim::{ReclaimEngine, ReclaimOptions, ReclaimReport};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_ssb") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "ssb.exe" } else { "ssb" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve ssb binary path for integration test"),
    }
}

/// Run the `ssb` binary and keep a transcript under the temp dir.
pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

/// Like [`run_cli_case`] with extra environment variables set.
pub fn run_cli_case_with_env(case_name: &str, args: &[&str], env: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("ssb-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .env_remove("SSB_OUTPUT_FORMAT")
        .envs(env.iter().copied())
        .output()
        .expect("execute ssb command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let log_content = format!(
        "case={case_name}\nbin={}\nargs={args:?}\nstatus={}\n----- stdout -----\n{stdout}\n----- stderr -----\n{stderr}\n",
        bin_path.display(),
        output.status,
    );
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Write `content` to `dir/name`, creating parents, and return the path.
pub fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(&path, content).expect("write fixture file");
    path
}

/// Reclaim engine double.
///
/// Each call records the requested usage percentage and the number of passes
/// running at once. A gated engine blocks until its gate sender is dropped.
/// On success the mock probe's free space is set to `free_after`.
pub struct ScriptedEngine {
    probe: Arc<MockProbe>,
    free_after: u64,
    fail: AtomicBool,
    gate: Option<Receiver<()>>,
    running: AtomicUsize,
    pub max_running: AtomicUsize,
    pub calls: AtomicUsize,
    pub requested_pct: parking_lot::Mutex<Vec<f64>>,
}

impl ScriptedEngine {
    pub fn new(probe: Arc<MockProbe>, free_after: u64) -> Arc<Self> {
        Arc::new(Self::build(probe, free_after, None))
    }

    pub fn gated(probe: Arc<MockProbe>, free_after: u64) -> (Arc<Self>, Sender<()>) {
        let (tx, rx) = bounded(0);
        (Arc::new(Self::build(probe, free_after, Some(rx))), tx)
    }

    fn build(probe: Arc<MockProbe>, free_after: u64, gate: Option<Receiver<()>>) -> Self {
        Self {
            probe,
            free_after,
            fail: AtomicBool::new(false),
            gate,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            requested_pct: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

impl ReclaimEngine for ScriptedEngine {
    fn clean(&self, root: &Path, options: &ReclaimOptions) -> Result<ReclaimReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.requested_pct
            .lock()
            .push(options.max_usage_percent.unwrap_or(f64::NAN));

        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(SsbError::Reclaim {
                root: root.to_path_buf(),
                details: "scripted failure".to_string(),
            });
        }
        self.probe.set_free(self.free_after);
        Ok(ReclaimReport {
            target_reached: true,
            ..ReclaimReport::default()
        })
    }
}
