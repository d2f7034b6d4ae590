//! Object transport contract for remote backup destinations.

#![allow(missing_docs)]

pub mod directory;
#[cfg(feature = "s3")]
pub mod s3;

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SsbError};

/// Canned access-control policy attached to uploaded objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectAcl {
    #[default]
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
    AwsExecRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
}

impl ObjectAcl {
    pub const ALL: [Self; 7] = [
        Self::Private,
        Self::PublicRead,
        Self::PublicReadWrite,
        Self::AuthenticatedRead,
        Self::AwsExecRead,
        Self::BucketOwnerRead,
        Self::BucketOwnerFullControl,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::PublicRead => "public-read",
            Self::PublicReadWrite => "public-read-write",
            Self::AuthenticatedRead => "authenticated-read",
            Self::AwsExecRead => "aws-exec-read",
            Self::BucketOwnerRead => "bucket-owner-read",
            Self::BucketOwnerFullControl => "bucket-owner-full-control",
        }
    }
}

impl fmt::Display for ObjectAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectAcl {
    type Err = SsbError;

    /// An empty string means the default (`private`).
    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::default());
        }
        Self::ALL
            .into_iter()
            .find(|acl| acl.as_str() == raw)
            .ok_or_else(|| SsbError::InvalidConfig {
                details: format!("invalid ACL value: {raw}"),
            })
    }
}

/// Which object store a remote session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStoreKind {
    /// Bucket directories under `remote.store_dir`.
    #[default]
    Directory,
    /// An S3-compatible service (AWS, MinIO, R2).
    S3,
}

impl ObjectStoreKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::S3 => "s3",
        }
    }
}

impl fmt::Display for ObjectStoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectStoreKind {
    type Err = SsbError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "directory" | "dir" => Ok(Self::Directory),
            "s3" => Ok(Self::S3),
            other => Err(SsbError::InvalidConfig {
                details: format!("unknown object store: {other} (expected directory or s3)"),
            }),
        }
    }
}

/// Per-object upload options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub acl: ObjectAcl,
}

/// Client for an object store bucket.
pub trait ObjectTransport: Send + Sync {
    /// Verify the bucket is reachable. Called once when a session is built.
    fn check_bucket(&self) -> Result<()>;

    /// Store `body` under `key`. `size_hint` is the expected length in bytes.
    fn put(&self, key: &str, body: &mut dyn Read, size_hint: u64, options: &PutOptions)
    -> Result<()>;
}

/// Join a prefix and a relative path into an object key with `/` separators.
///
/// Backslashes are normalized, empty and `.` segments dropped, and no leading
/// slash is kept.
#[must_use]
pub fn object_key(prefix: &str, relative: &str) -> String {
    prefix
        .split(['/', '\\'])
        .chain(relative.split(['/', '\\']))
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}
