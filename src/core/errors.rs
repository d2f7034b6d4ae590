//! SSB-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, SsbError>;

/// Top-level error type for Storage Safe Backup.
#[derive(Debug, Error)]
pub enum SsbError {
    #[error("[SSB-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[SSB-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[SSB-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[SSB-1101] invalid input: {details}")]
    InvalidInput { details: String },

    #[error("[SSB-2001] capacity probe failure for {path}: {details}")]
    CapacityProbe { path: PathBuf, details: String },

    #[error("[SSB-2002] reclaim engine failure under {root}: {details}")]
    Reclaim { root: PathBuf, details: String },

    #[error("[SSB-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[SSB-3001] backup failed for {path}: {details}")]
    BackupFailed { path: PathBuf, details: String },

    #[error("[SSB-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SSB-3003] object transport failure for key {key}: {details}")]
    Transport { key: String, details: String },

    #[error("[SSB-4001] timed out waiting for {pending} outstanding task(s)")]
    Timeout { pending: usize },

    #[error("[SSB-4002] wait cancelled with {pending} outstanding task(s)")]
    Cancelled { pending: usize },

    #[error("[SSB-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl SsbError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "SSB-1001",
            Self::MissingConfig { .. } => "SSB-1002",
            Self::ConfigParse { .. } => "SSB-1003",
            Self::InvalidInput { .. } => "SSB-1101",
            Self::CapacityProbe { .. } => "SSB-2001",
            Self::Reclaim { .. } => "SSB-2002",
            Self::Serialization { .. } => "SSB-2101",
            Self::BackupFailed { .. } => "SSB-3001",
            Self::Io { .. } => "SSB-3002",
            Self::Transport { .. } => "SSB-3003",
            Self::Timeout { .. } => "SSB-4001",
            Self::Cancelled { .. } => "SSB-4002",
            Self::Runtime { .. } => "SSB-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::CapacityProbe { .. }
                | Self::Reclaim { .. }
                | Self::BackupFailed { .. }
                | Self::Transport { .. }
                | Self::Timeout { .. }
                | Self::Runtime { .. }
        )
    }

    /// True for the two ways a completion wait can end without the work finishing.
    #[must_use]
    pub const fn is_wait_expired(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for rejected caller input.
    #[must_use]
    pub fn invalid_input(details: impl Into<String>) -> Self {
        Self::InvalidInput {
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for SsbError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for SsbError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
