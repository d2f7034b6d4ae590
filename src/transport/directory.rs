//! Filesystem-backed object store: a bucket is a directory, a key is a path.
//!
//! Object metadata (ACL, size, SHA-256) lives in a JSON sidecar under
//! `<bucket>/.ssb-meta/<key>.json` so object names stay unconstrained.

#![allow(missing_docs)]

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::errors::{Result, SsbError};
use crate::transport::{ObjectAcl, ObjectTransport, PutOptions};

const META_DIR: &str = ".ssb-meta";

/// Sidecar record written next to every stored object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectMeta {
    pub acl: ObjectAcl,
    pub size: u64,
    pub sha256: String,
}

/// [`ObjectTransport`] over a local directory tree.
#[derive(Debug, Clone)]
pub struct DirectoryObjectStore {
    bucket_dir: PathBuf,
}

impl DirectoryObjectStore {
    /// `base/bucket` is the bucket directory. It is not created here.
    pub fn new(base: impl AsRef<Path>, bucket: &str) -> Self {
        Self {
            bucket_dir: base.as_ref().join(bucket),
        }
    }

    /// Create the bucket directory if it does not exist.
    pub fn create_bucket(&self) -> Result<()> {
        fs::create_dir_all(&self.bucket_dir).map_err(|e| SsbError::io(&self.bucket_dir, e))
    }

    pub fn bucket_dir(&self) -> &Path {
        &self.bucket_dir
    }

    pub fn object_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.bucket_dir.join(checked_key(key)?))
    }

    pub fn meta(&self, key: &str) -> Result<ObjectMeta> {
        let path = self.meta_path(key)?;
        let raw = fs::read_to_string(&path).map_err(|e| SsbError::io(&path, e))?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn meta_path(&self, key: &str) -> Result<PathBuf> {
        let rel = checked_key(key)?;
        let mut name = rel.into_os_string();
        name.push(".json");
        Ok(self.bucket_dir.join(META_DIR).join(name))
    }
}

impl ObjectTransport for DirectoryObjectStore {
    fn check_bucket(&self) -> Result<()> {
        if self.bucket_dir.is_dir() {
            Ok(())
        } else {
            Err(SsbError::Transport {
                key: String::new(),
                details: format!("bucket directory {} does not exist", self.bucket_dir.display()),
            })
        }
    }

    fn put(
        &self,
        key: &str,
        body: &mut dyn Read,
        size_hint: u64,
        options: &PutOptions,
    ) -> Result<()> {
        let transport_err = |details: String| SsbError::Transport {
            key: key.to_string(),
            details,
        };
        self.check_bucket()?;
        let target = self.object_path(key)?;
        let meta_path = self.meta_path(key)?;
        for dir in [target.parent(), meta_path.parent()].into_iter().flatten() {
            fs::create_dir_all(dir).map_err(|e| SsbError::io(dir, e))?;
        }

        let mut staging = target.clone().into_os_string();
        staging.push(".ssb-part");
        let staging = PathBuf::from(staging);
        let (size, digest) = write_hashed(&staging, body).map_err(|e| {
            let _ = fs::remove_file(&staging);
            transport_err(e.to_string())
        })?;
        if size != size_hint {
            let _ = fs::remove_file(&staging);
            return Err(transport_err(format!(
                "content length mismatch: expected {size_hint}, read {size}"
            )));
        }
        fs::rename(&staging, &target).map_err(|e| transport_err(e.to_string()))?;

        let meta = ObjectMeta {
            acl: options.acl,
            size,
            sha256: digest,
        };
        let json = serde_json::to_string(&meta)?;
        fs::write(&meta_path, json).map_err(|e| SsbError::io(&meta_path, e))
    }
}

fn write_hashed(path: &Path, body: &mut dyn Read) -> io::Result<(u64, String)> {
    let mut file = File::create(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = body.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n])?;
        total += n as u64;
    }
    file.sync_all()?;
    Ok((total, format!("{:x}", hasher.finalize())))
}

/// Keys must be relative and may not climb out of the bucket.
fn checked_key(key: &str) -> Result<PathBuf> {
    let rel = PathBuf::from(key);
    let escapes = rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if key.is_empty() || escapes || rel.starts_with(META_DIR) {
        return Err(SsbError::Transport {
            key: key.to_string(),
            details: "object key must be a relative path inside the bucket".to_string(),
        });
    }
    Ok(rel)
}
