//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SsbError};
use crate::logger::activity::CHANNEL_CAPACITY;
use crate::reclaim::ReclaimOptions;
use crate::transport::{ObjectAcl, ObjectStoreKind};

const GIB: u64 = 1024 * 1024 * 1024;

/// Default accumulated-write interval between forced capacity checks (1 GiB).
pub const DEFAULT_CHECK_INTERVAL: u64 = GIB;

/// Full SSB configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

/// Local backup session settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Destination root. Created on session start when absent.
    pub root: PathBuf,
    /// Free bytes below which a cleanup pass starts. Must be > 0.
    pub free_space_threshold: u64,
    /// Free bytes a cleanup pass aims to restore. Must exceed the threshold.
    pub target_free_space: u64,
    /// Bytes saved between forced capacity checks. 0 selects the 1 GiB default.
    pub check_interval: u64,
    /// Re-read source and destination after each copy and compare SHA-256.
    pub verify_copies: bool,
    /// Options handed through to the reclaim engine.
    pub reclaim: ReclaimOptions,
}

/// Remote (object store) session settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    pub bucket: String,
    /// Key prefix prepended to every relative path.
    pub prefix: String,
    /// Canned ACL name; empty means `private`.
    pub acl: String,
    /// Base directory of the directory-backed object store used by the CLI.
    pub store_dir: PathBuf,
    /// Upload threads per remote session.
    pub upload_workers: usize,
    /// Backend the CLI uploads to.
    pub store: ObjectStoreKind,
    /// S3 region. Required for the `s3` store.
    pub region: String,
    /// Custom S3 endpoint URL (MinIO and friends). Empty means AWS. A custom
    /// endpoint switches to path-style addressing.
    pub endpoint: String,
    /// Static credentials. When either key is empty the standard AWS
    /// environment and profile lookup is used instead.
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

/// Activity log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub jsonl_path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    pub channel_capacity: usize,
}

fn data_dir() -> PathBuf {
    let home_dir = env::var_os("HOME").map_or_else(
        || {
            eprintln!("[SSB-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    );
    home_dir.join(".local").join("share").join("ssb")
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("backups"),
            free_space_threshold: 10 * GIB,
            target_free_space: 20 * GIB,
            check_interval: DEFAULT_CHECK_INTERVAL,
            verify_copies: false,
            reclaim: ReclaimOptions::default(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: String::new(),
            acl: ObjectAcl::Private.as_str().to_string(),
            store_dir: data_dir().join("objects"),
            upload_workers: 4,
            store: ObjectStoreKind::Directory,
            region: String::new(),
            endpoint: String::new(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            session_token: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jsonl_path: data_dir().join("activity.jsonl"),
            fallback_path: None,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Convenience constructor with default interval and reclaim options.
    pub fn new(root: impl Into<PathBuf>, free_space_threshold: u64, target_free_space: u64) -> Self {
        Self {
            root: root.into(),
            free_space_threshold,
            target_free_space,
            ..Self::default()
        }
    }

    /// Check interval with the zero-means-default rule applied.
    #[must_use]
    pub fn effective_check_interval(&self) -> u64 {
        if self.check_interval == 0 {
            DEFAULT_CHECK_INTERVAL
        } else {
            self.check_interval
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(SsbError::InvalidConfig {
                details: "session.root is required".to_string(),
            });
        }
        if self.free_space_threshold == 0 {
            return Err(SsbError::InvalidConfig {
                details: "session.free_space_threshold must be > 0".to_string(),
            });
        }
        if self.target_free_space <= self.free_space_threshold {
            return Err(SsbError::InvalidConfig {
                details: format!(
                    "session.target_free_space ({}) must be greater than free_space_threshold ({})",
                    self.target_free_space, self.free_space_threshold
                ),
            });
        }
        if let Some(pct) = self.reclaim.max_usage_percent
            && !(pct.is_finite() && (0.0..=100.0).contains(&pct))
        {
            return Err(SsbError::InvalidConfig {
                details: format!("session.reclaim.max_usage_percent must be in [0, 100], got {pct}"),
            });
        }
        for pattern in &self.reclaim.protect_patterns {
            regex::Regex::new(pattern).map_err(|e| SsbError::InvalidConfig {
                details: format!("session.reclaim.protect_patterns entry {pattern:?}: {e}"),
            })?;
        }
        Ok(())
    }
}

impl RemoteConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Self::default()
        }
    }

    /// Parsed ACL; empty selects `private`.
    pub fn object_acl(&self) -> Result<ObjectAcl> {
        self.acl.parse()
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(SsbError::InvalidConfig {
                details: "remote.bucket is required".to_string(),
            });
        }
        if self.upload_workers == 0 {
            return Err(SsbError::InvalidConfig {
                details: "remote.upload_workers must be >= 1".to_string(),
            });
        }
        self.object_acl()?;
        self.validate_endpoint()?;
        if self.store == ObjectStoreKind::S3 && self.region.trim().is_empty() {
            return Err(SsbError::InvalidConfig {
                details: "remote.region is required for the s3 store".to_string(),
            });
        }
        Ok(())
    }

    /// Custom endpoint, if any, trimmed of whitespace and trailing slashes.
    #[must_use]
    pub fn custom_endpoint(&self) -> Option<&str> {
        let endpoint = self.endpoint.trim().trim_end_matches('/');
        (!endpoint.is_empty()).then_some(endpoint)
    }

    fn validate_endpoint(&self) -> Result<()> {
        match self.custom_endpoint() {
            Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                Err(SsbError::InvalidConfig {
                    details: format!("remote.endpoint must be an http(s) URL: {url}"),
                })
            }
            _ => Ok(()),
        }
    }

    /// Copy with credentials masked, for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mask = |secret: &str| {
            if secret.is_empty() {
                String::new()
            } else {
                "********".to_string()
            }
        };
        Self {
            secret_access_key: mask(&self.secret_access_key),
            session_token: mask(&self.session_token),
            ..self.clone()
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        let home_dir = env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        home_dir.join(".config").join("ssb").join("config.toml")
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| SsbError::io(&path_buf, source))?;
            toml::from_str(&raw)?
        } else if path.is_some() {
            return Err(SsbError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over canonical JSON, stable across processes and Rust releases.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("SSB_SESSION_ROOT") {
            self.session.root = PathBuf::from(raw);
        }
        set_u64(&mut lookup, "SSB_SESSION_FREE_SPACE_THRESHOLD", &mut self.session.free_space_threshold)?;
        set_u64(&mut lookup, "SSB_SESSION_TARGET_FREE_SPACE", &mut self.session.target_free_space)?;
        set_u64(&mut lookup, "SSB_SESSION_CHECK_INTERVAL", &mut self.session.check_interval)?;
        set_bool(&mut lookup, "SSB_SESSION_VERIFY_COPIES", &mut self.session.verify_copies)?;

        let reclaim = &mut self.session.reclaim;
        if let Some(raw) = lookup("SSB_RECLAIM_MAX_USAGE_PERCENT") {
            reclaim.max_usage_percent =
                Some(raw.parse::<f64>().map_err(|error| env_parse_error("SSB_RECLAIM_MAX_USAGE_PERCENT", &raw, &error))?);
        }
        set_bool(&mut lookup, "SSB_RECLAIM_REMOVE_EMPTY_DIRS", &mut reclaim.remove_empty_dirs)?;
        set_u64(&mut lookup, "SSB_RECLAIM_MIN_FILE_AGE_SECS", &mut reclaim.min_file_age_secs)?;
        set_bool(&mut lookup, "SSB_RECLAIM_DRY_RUN", &mut reclaim.dry_run)?;

        if let Some(raw) = lookup("SSB_REMOTE_BUCKET") {
            self.remote.bucket = raw;
        }
        if let Some(raw) = lookup("SSB_REMOTE_PREFIX") {
            self.remote.prefix = raw;
        }
        if let Some(raw) = lookup("SSB_REMOTE_ACL") {
            self.remote.acl = raw;
        }
        if let Some(raw) = lookup("SSB_REMOTE_STORE_DIR") {
            self.remote.store_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("SSB_REMOTE_STORE") {
            self.remote.store = raw.parse()?;
        }
        for (name, slot) in [
            ("SSB_REMOTE_REGION", &mut self.remote.region),
            ("SSB_REMOTE_ENDPOINT", &mut self.remote.endpoint),
            ("SSB_REMOTE_ACCESS_KEY_ID", &mut self.remote.access_key_id),
            ("SSB_REMOTE_SECRET_ACCESS_KEY", &mut self.remote.secret_access_key),
            ("SSB_REMOTE_SESSION_TOKEN", &mut self.remote.session_token),
        ] {
            if let Some(raw) = lookup(name) {
                *slot = raw;
            }
        }
        if let Some(raw) = lookup("SSB_REMOTE_UPLOAD_WORKERS") {
            self.remote.upload_workers = raw
                .trim()
                .parse::<usize>()
                .map_err(|error| env_parse_error("SSB_REMOTE_UPLOAD_WORKERS", &raw, &error))?;
        }

        set_bool(&mut lookup, "SSB_LOGGING_ENABLED", &mut self.logging.enabled)?;
        if let Some(raw) = lookup("SSB_LOGGING_JSONL_PATH") {
            self.logging.jsonl_path = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Strip trailing slashes so roots compare and join consistently.
    fn normalize_paths(&mut self) {
        for path in [&mut self.session.root, &mut self.remote.store_dir] {
            let s = path.to_string_lossy();
            if s.len() > 1
                && let Some(stripped) = s.strip_suffix('/')
            {
                *path = PathBuf::from(stripped);
            }
        }
    }

    /// The remote section is only checked when a bucket is configured.
    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        self.remote.object_acl()?;
        self.remote.validate_endpoint()?;
        if self.remote.upload_workers == 0 {
            return Err(SsbError::InvalidConfig {
                details: "remote.upload_workers must be >= 1".to_string(),
            });
        }
        if self.logging.channel_capacity == 0 {
            return Err(SsbError::InvalidConfig {
                details: "logging.channel_capacity must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn env_parse_error(name: &str, raw: &str, error: &dyn std::fmt::Display) -> SsbError {
    SsbError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    }
}

fn set_u64<F>(lookup: &mut F, name: &str, slot: &mut u64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw
            .trim()
            .parse::<u64>()
            .map_err(|error| env_parse_error(name, &raw, &error))?;
    }
    Ok(())
}

fn set_bool<F>(lookup: &mut F, name: &str, slot: &mut bool) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw
            .trim()
            .parse::<bool>()
            .map_err(|error| env_parse_error(name, &raw, &error))?;
    }
    Ok(())
}
