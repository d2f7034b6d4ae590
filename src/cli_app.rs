//! Top-level CLI definition and dispatch.

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use colored::{Colorize, control};
use serde_json::{Value, json};
use signal_hook::consts::{SIGINT, SIGTERM};
use thiserror::Error;

use storage_safe_backup::core::config::{Config, RemoteConfig};
use storage_safe_backup::core::errors::SsbError;
use storage_safe_backup::logger::activity::{ActivityLoggerHandle, spawn_logger};
use storage_safe_backup::logger::jsonl::JsonlConfig;
use storage_safe_backup::platform::pal::{CapacityProbe, DiskUsage, StatvfsProbe};
use storage_safe_backup::reclaim::age_ordered::AgeOrderedReclaimer;
use storage_safe_backup::reclaim::{ReclaimEngine, ReclaimOptions};
use storage_safe_backup::session::coordinator::{Collaborators, target_usage_percent};
use storage_safe_backup::session::local::LocalBackupSession;
use storage_safe_backup::session::remote::RemoteBackupSession;
use storage_safe_backup::session::{BackupSession, CancelToken, SessionStats};
use storage_safe_backup::transport::directory::DirectoryObjectStore;
#[cfg(feature = "s3")]
use storage_safe_backup::transport::s3::S3Transport;
use storage_safe_backup::transport::{ObjectStoreKind, ObjectTransport};

/// Storage Safe Backup - back up files without ever filling the destination.
#[derive(Debug, Parser)]
#[command(
    name = "ssb",
    author,
    version,
    about = "Storage Safe Backup - capacity-aware backup sessions",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Back up files or directory trees into a local root.
    Backup(BackupArgs),
    /// Upload files or directory trees to a directory-backed object store.
    Upload(UploadArgs),
    /// Show disk usage and threshold evaluation for a backup root.
    Status(StatusArgs),
    /// Run one cleanup pass against a backup root.
    Clean(CleanArgs),
    /// View configuration state.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args)]
struct BackupArgs {
    /// Files or directories to back up.
    #[arg(value_name = "PATH", required = true)]
    sources: Vec<PathBuf>,
    /// Destination root (defaults to `session.root`).
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,
    /// Relative directory under the root to place files in.
    #[arg(long, value_name = "REL")]
    dest_prefix: Option<String>,
    /// Verify every copy with SHA-256.
    #[arg(long)]
    verify: bool,
    /// Seconds to wait for background cleanup before giving up.
    #[arg(long, default_value_t = 600, value_name = "SECONDS")]
    timeout_secs: u64,
}

#[derive(Debug, Clone, Args)]
struct UploadArgs {
    /// Files or directories to upload.
    #[arg(value_name = "PATH", required = true)]
    sources: Vec<PathBuf>,
    /// Bucket name (defaults to `remote.bucket`).
    #[arg(long)]
    bucket: Option<String>,
    /// Key prefix (defaults to `remote.prefix`).
    #[arg(long)]
    prefix: Option<String>,
    /// Canned ACL (defaults to `remote.acl`).
    #[arg(long)]
    acl: Option<String>,
    /// Object store backend: `directory` or `s3` (defaults to `remote.store`).
    #[arg(long, value_name = "KIND")]
    store: Option<String>,
    /// Object store base directory for the directory store (defaults to `remote.store_dir`).
    #[arg(long, value_name = "PATH")]
    store_dir: Option<PathBuf>,
    /// S3 region (defaults to `remote.region`).
    #[arg(long)]
    region: Option<String>,
    /// Custom S3 endpoint URL, e.g. a MinIO server (defaults to `remote.endpoint`).
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,
    /// Create the bucket directory if missing (directory store only).
    #[arg(long)]
    create_bucket: bool,
    /// Seconds to wait for uploads to finish.
    #[arg(long, default_value_t = 600, value_name = "SECONDS")]
    timeout_secs: u64,
}

#[derive(Debug, Clone, Args)]
struct StatusArgs {
    /// Backup root to inspect (defaults to `session.root`).
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CleanArgs {
    /// Backup root to clean (defaults to `session.root`).
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,
    /// Target usage percentage (defaults to the level implied by `target_free_space`).
    #[arg(long, value_name = "PERCENT")]
    max_usage: Option<f64>,
    /// Report what would be deleted without deleting.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and print its hash.
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<SsbError> for CliError {
    fn from(err: SsbError) -> Self {
        match err {
            SsbError::InvalidConfig { .. }
            | SsbError::MissingConfig { .. }
            | SsbError::ConfigParse { .. }
            | SsbError::InvalidInput { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Backup(args) => run_backup(cli, args),
        Command::Upload(args) => run_upload(cli, args),
        Command::Status(args) => run_status(cli, args),
        Command::Clean(args) => run_clean(cli, args),
        Command::Config(args) => run_config(cli, args),
    }
}

// ---------------------------------------------------------------------------
// Backup / upload
// ---------------------------------------------------------------------------

fn run_backup(cli: &Cli, args: &BackupArgs) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(root) = &args.root {
        config.session.root.clone_from(root);
    }
    config.session.verify_copies |= args.verify;

    let files = collect_sources(&args.sources, args.dest_prefix.as_deref())?;
    let (events, logger) = start_activity_log(&config)?;
    let mut collaborators = Collaborators::system();
    if let Some(events) = &events {
        collaborators = collaborators.with_events(events.clone());
    }

    let session = LocalBackupSession::new(config.session.clone(), collaborators)?;
    let outcome = drive_session(
        &session,
        &files,
        Duration::from_secs(args.timeout_secs),
        register_shutdown_flag(),
    );
    stop_activity_log(events, logger);

    report_run(cli, "backup", &session.root().display().to_string(), &outcome, &[])
}

fn run_upload(cli: &Cli, args: &UploadArgs) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    let remote = &mut config.remote;
    if let Some(bucket) = &args.bucket {
        remote.bucket.clone_from(bucket);
    }
    if let Some(prefix) = &args.prefix {
        remote.prefix.clone_from(prefix);
    }
    if let Some(acl) = &args.acl {
        remote.acl.clone_from(acl);
    }
    if let Some(store) = &args.store {
        remote.store = store.parse()?;
    }
    if let Some(store_dir) = &args.store_dir {
        remote.store_dir.clone_from(store_dir);
    }
    if let Some(region) = &args.region {
        remote.region.clone_from(region);
    }
    if let Some(endpoint) = &args.endpoint {
        remote.endpoint.clone_from(endpoint);
    }
    remote.validate()?;

    let transport = open_transport(remote, args.create_bucket)?;
    let files = collect_sources(&args.sources, None)?;
    let (events, logger) = start_activity_log(&config)?;
    let session = RemoteBackupSession::with_events(&config.remote, transport, events.clone())?;
    let outcome = drive_session(
        &session,
        &files,
        Duration::from_secs(args.timeout_secs),
        register_shutdown_flag(),
    );
    let failures: Vec<Value> = session
        .transfer_failures()
        .iter()
        .map(|f| json!({"key": f.key, "code": f.error_code, "error": f.message}))
        .collect();
    stop_activity_log(events, logger);

    report_run(cli, "upload", session.bucket(), &outcome, &failures)
}

fn open_transport(remote: &RemoteConfig, create_bucket: bool) -> Result<Arc<dyn ObjectTransport>, CliError> {
    match remote.store {
        ObjectStoreKind::Directory => {
            let store = DirectoryObjectStore::new(&remote.store_dir, &remote.bucket);
            if create_bucket {
                store.create_bucket()?;
            }
            Ok(Arc::new(store))
        }
        ObjectStoreKind::S3 if create_bucket => Err(CliError::User(
            "--create-bucket only applies to the directory store".to_string(),
        )),
        ObjectStoreKind::S3 => open_s3(remote),
    }
}

#[cfg(feature = "s3")]
fn open_s3(remote: &RemoteConfig) -> Result<Arc<dyn ObjectTransport>, CliError> {
    Ok(Arc::new(S3Transport::connect(remote)?))
}

#[cfg(not(feature = "s3"))]
fn open_s3(_remote: &RemoteConfig) -> Result<Arc<dyn ObjectTransport>, CliError> {
    Err(CliError::User(
        "this build has no S3 support (rebuild with --features s3)".to_string(),
    ))
}

/// Result of feeding files to a session and waiting for it.
struct RunOutcome {
    submitted: usize,
    interrupted: bool,
    save_errors: Vec<String>,
    wait_error: Option<SsbError>,
    stats: SessionStats,
}

/// Submit `files`, then wait for background work.
///
/// Tripping `shutdown` stops submission and cancels the wait; either way
/// the run is reported as interrupted.
fn drive_session(
    session: &dyn BackupSession,
    files: &[(PathBuf, String)],
    timeout: Duration,
    shutdown: Arc<AtomicBool>,
) -> RunOutcome {
    let mut submitted = 0;
    let mut save_errors = Vec::new();
    let mut interrupted = false;

    for (source, relative) in files {
        if shutdown.load(Ordering::Relaxed) {
            interrupted = true;
            break;
        }
        match session.save(source, relative) {
            Ok(()) => submitted += 1,
            Err(e) => save_errors.push(format!("{}: {e}", source.display())),
        }
    }

    let cancel = CancelToken::from_flag(shutdown);
    let wait_error = match session.wait_until(Instant::now().checked_add(timeout), Some(&cancel)) {
        Ok(()) => None,
        Err(SsbError::Cancelled { .. }) => {
            interrupted = true;
            None
        }
        Err(e) => Some(e),
    };
    let _ = session.close();
    RunOutcome {
        submitted,
        interrupted,
        save_errors,
        wait_error,
        stats: session.stats(),
    }
}

fn report_run(
    cli: &Cli,
    command: &str,
    destination: &str,
    outcome: &RunOutcome,
    transfer_failures: &[Value],
) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            println!("{command}: {} file(s) submitted to {destination}", outcome.submitted);
            println!(
                "  Saved: {} ({})",
                outcome.stats.files_saved,
                format_bytes(outcome.stats.bytes_saved)
            );
            println!(
                "  Cleanup passes: {} started, {} completed",
                outcome.stats.passes_started, outcome.stats.passes_completed
            );
            if outcome.interrupted {
                println!("  {}", "Interrupted: remaining files were not submitted.".yellow());
            }
            for err in &outcome.save_errors {
                eprintln!("  {} {err}", "failed:".red());
            }
            for failure in transfer_failures {
                eprintln!("  {} {failure}", "upload failed:".red());
            }
            if let Some(err) = &outcome.wait_error {
                eprintln!("  {} {err}", "wait:".red());
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": command,
                "destination": destination,
                "submitted": outcome.submitted,
                "interrupted": outcome.interrupted,
                "save_errors": outcome.save_errors,
                "transfer_failures": transfer_failures,
                "wait_error": outcome.wait_error.as_ref().map(ToString::to_string),
                "stats": serde_json::to_value(outcome.stats)?,
            });
            write_json_line(&payload)?;
        }
    }

    if let Some(err) = &outcome.wait_error {
        return Err(CliError::Runtime(err.to_string()));
    }
    if !outcome.save_errors.is_empty() || !transfer_failures.is_empty() || outcome.interrupted {
        return Err(CliError::Partial(format!(
            "{command} finished with {} failure(s)",
            outcome.save_errors.len() + transfer_failures.len()
        )));
    }
    Ok(())
}

/// Expand sources into `(file, relative destination)` pairs.
///
/// A file maps to its file name; a directory maps to its name plus each
/// file's path below it. Symlinks are not followed.
fn collect_sources(sources: &[PathBuf], dest_prefix: Option<&str>) -> Result<Vec<(PathBuf, String)>, CliError> {
    let mut files = Vec::new();
    for source in sources {
        let meta = fs::symlink_metadata(source)
            .map_err(|e| CliError::User(format!("{}: {e}", source.display())))?;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CliError::User(format!("{}: no file name", source.display())))?;
        if meta.is_dir() {
            walk_dir(source, &name, &mut files)?;
        } else if meta.is_file() {
            files.push((source.clone(), name));
        }
    }

    if let Some(prefix) = dest_prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        for (_, relative) in &mut files {
            *relative = format!("{prefix}/{relative}");
        }
    }
    Ok(files)
}

fn walk_dir(dir: &Path, relative: &str, out: &mut Vec<(PathBuf, String)>) -> Result<(), CliError> {
    let entries = fs::read_dir(dir).map_err(|e| CliError::Runtime(format!("{}: {e}", dir.display())))?;
    let mut entries: Vec<_> = entries.filter_map(std::result::Result::ok).collect();
    entries.sort_by_key(fs::DirEntry::file_name);
    for entry in entries {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let child = format!("{relative}/{}", entry.file_name().to_string_lossy());
        if file_type.is_dir() {
            walk_dir(&entry.path(), &child, out)?;
        } else if file_type.is_file() {
            out.push((entry.path(), child));
        }
    }
    Ok(())
}

/// SIGINT/SIGTERM set the returned flag. Registering replaces the default
/// terminate action, so every wait must observe the flag.
fn register_shutdown_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&flag)) {
            eprintln!("[SSB-SIGNAL] failed to register signal {signal}: {e}");
        }
    }
    flag
}

fn start_activity_log(
    config: &Config,
) -> Result<(Option<ActivityLoggerHandle>, Option<JoinHandle<()>>), CliError> {
    if !config.logging.enabled {
        return Ok((None, None));
    }
    let jsonl = JsonlConfig {
        path: config.logging.jsonl_path.clone(),
        fallback_path: config.logging.fallback_path.clone(),
        ..JsonlConfig::default()
    };
    let (handle, join) = spawn_logger(jsonl, config.logging.channel_capacity)?;
    Ok((Some(handle), Some(join)))
}

fn stop_activity_log(events: Option<ActivityLoggerHandle>, logger: Option<JoinHandle<()>>) {
    if let Some(events) = events {
        events.shutdown();
    }
    if let Some(join) = logger {
        let _ = join.join();
    }
}

// ---------------------------------------------------------------------------
// Status / clean
// ---------------------------------------------------------------------------

fn run_status(cli: &Cli, args: &StatusArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let root = args.root.clone().unwrap_or_else(|| config.session.root.clone());
    let usage = StatvfsProbe::new().disk_usage(&root)?;
    let session = &config.session;
    let level = capacity_level(&usage, session.free_space_threshold, session.target_free_space);

    match output_mode(cli) {
        OutputMode::Human => {
            println!("Storage Safe Backup v{}", env!("CARGO_PKG_VERSION"));
            println!("  Root: {}", root.display());
            println!(
                "  Total: {}  Free: {}  Used: {:.1}%",
                format_bytes(usage.total),
                format_bytes(usage.free),
                usage.used_pct()
            );
            println!(
                "  Threshold: {}  Target free: {}",
                format_bytes(session.free_space_threshold),
                format_bytes(session.target_free_space)
            );
            let label = match level {
                "ok" => level.to_uppercase().green(),
                "watch" => level.to_uppercase().yellow(),
                _ => level.to_uppercase().red(),
            };
            println!("  Level: {label}");
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "status",
                "root": root.to_string_lossy(),
                "usage": serde_json::to_value(usage)?,
                "free_space_threshold": session.free_space_threshold,
                "target_free_space": session.target_free_space,
                "level": level,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

/// `cleanup` below the threshold, `watch` between threshold and target, else `ok`.
fn capacity_level(usage: &DiskUsage, threshold: u64, target: u64) -> &'static str {
    if usage.free < threshold {
        "cleanup"
    } else if usage.free < target {
        "watch"
    } else {
        "ok"
    }
}

fn run_clean(cli: &Cli, args: &CleanArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let root = args.root.clone().unwrap_or_else(|| config.session.root.clone());
    let probe: Arc<dyn CapacityProbe> = Arc::new(StatvfsProbe::new());
    let usage = probe.disk_usage(&root)?;

    let target_pct = args
        .max_usage
        .or(config.session.reclaim.max_usage_percent)
        .unwrap_or_else(|| target_usage_percent(usage.total, config.session.target_free_space));
    let options = ReclaimOptions {
        max_usage_percent: Some(target_pct),
        dry_run: args.dry_run || config.session.reclaim.dry_run,
        ..config.session.reclaim.clone()
    };

    let engine = AgeOrderedReclaimer::new(probe);
    let report = engine.clean(&root, &options)?;

    match output_mode(cli) {
        OutputMode::Human => {
            let verb = if report.dry_run { "Would delete" } else { "Deleted" };
            println!(
                "{verb} {} file(s), {} under {}",
                report.files_deleted,
                format_bytes(report.bytes_freed),
                root.display()
            );
            println!("  Target usage: {:.1}%", report.target_usage_pct);
            println!("  Directories removed: {}", report.dirs_removed);
            println!("  Skipped: {}", report.files_skipped);
            if !report.target_reached {
                println!("  {}", "Target not reached.".yellow());
            }
            for failure in &report.errors {
                eprintln!("  {} {}: {}", "failed:".red(), failure.path.display(), failure.error);
            }
        }
        OutputMode::Json => {
            let errors: Vec<Value> = report
                .errors
                .iter()
                .map(|f| json!({"path": f.path.to_string_lossy(), "error": f.error}))
                .collect();
            let payload = json!({
                "command": "clean",
                "root": root.to_string_lossy(),
                "dry_run": report.dry_run,
                "target_usage_pct": report.target_usage_pct,
                "files_deleted": report.files_deleted,
                "bytes_freed": report.bytes_freed,
                "dirs_removed": report.dirs_removed,
                "files_skipped": report.files_skipped,
                "target_reached": report.target_reached,
                "duration_ms": u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
                "errors": errors,
            });
            write_json_line(&payload)?;
        }
    }

    if report.errors.is_empty() {
        Ok(())
    } else {
        Err(CliError::Partial(format!("{} deletion(s) failed", report.errors.len())))
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let mut config = Config::load(cli.config.as_deref())?;
            config.remote = config.remote.redacted();

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    if bytes >= TIB {
        format!("{:.1} TB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("SSB_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
