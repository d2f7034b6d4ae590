//! S3-compatible object transport (AWS S3, MinIO, R2) over `rust-s3`.
//!
//! Uses the blocking client so uploads run on the session's own worker
//! threads. A custom endpoint switches to path-style addressing, which is
//! what MinIO and most self-hosted stores expect.

#![allow(missing_docs)]

use std::io::Read;

use ::s3::bucket::Bucket;
use ::s3::creds::Credentials;
use ::s3::region::Region;

use crate::core::config::RemoteConfig;
use crate::core::errors::{Result, SsbError};
use crate::transport::{ObjectTransport, PutOptions};

const ACL_HEADER: &str = "x-amz-acl";

/// Where requests for a bucket are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Target {
    pub bucket: String,
    pub region: String,
    /// `None` for AWS proper, where the region selects the host.
    pub endpoint: Option<String>,
    pub path_style: bool,
}

impl S3Target {
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let region = config.region.trim();
        if region.is_empty() {
            return Err(SsbError::InvalidConfig {
                details: "remote.region is required for the s3 store".to_string(),
            });
        }
        let endpoint = config.custom_endpoint().map(str::to_string);
        Ok(Self {
            bucket: config.bucket.trim().to_string(),
            region: region.to_string(),
            path_style: endpoint.is_some(),
            endpoint,
        })
    }

    fn region(&self) -> Result<Region> {
        match &self.endpoint {
            Some(endpoint) => Ok(Region::Custom {
                region: self.region.clone(),
                endpoint: endpoint.clone(),
            }),
            None => self.region.parse::<Region>().map_err(|e| SsbError::InvalidConfig {
                details: format!("unsupported S3 region {}: {e}", self.region),
            }),
        }
    }
}

/// Static keys when both are configured, otherwise the AWS default chain
/// (environment, profile, instance metadata).
fn credentials(config: &RemoteConfig) -> Result<Credentials> {
    let access = config.access_key_id.trim();
    let secret = config.secret_access_key.trim();
    let token = Some(config.session_token.trim()).filter(|t| !t.is_empty());
    let creds = if access.is_empty() || secret.is_empty() {
        Credentials::default()
    } else {
        Credentials::new(Some(access), Some(secret), None, token, None)
    };
    creds.map_err(|e| SsbError::Transport {
        key: String::new(),
        details: format!("cannot resolve S3 credentials: {e}"),
    })
}

fn transport_error(key: &str, details: impl std::fmt::Display) -> SsbError {
    SsbError::Transport {
        key: key.to_string(),
        details: details.to_string(),
    }
}

/// [`ObjectTransport`] for one S3 bucket.
pub struct S3Transport {
    target: S3Target,
    bucket: Box<Bucket>,
}

impl S3Transport {
    /// Build a client for `config`. No request is sent until
    /// [`ObjectTransport::check_bucket`] or [`ObjectTransport::put`].
    pub fn connect(config: &RemoteConfig) -> Result<Self> {
        let target = S3Target::from_config(config)?;
        let bucket = Bucket::new(&target.bucket, target.region()?, credentials(config)?)
            .map_err(|e| transport_error("", e))?;
        let bucket = if target.path_style {
            bucket.with_path_style()
        } else {
            bucket
        };
        Ok(Self { target, bucket })
    }

    pub fn target(&self) -> &S3Target {
        &self.target
    }
}

impl ObjectTransport for S3Transport {
    fn check_bucket(&self) -> Result<()> {
        match self.bucket.exists() {
            Ok(true) => Ok(()),
            Ok(false) => Err(transport_error(
                "",
                format!("bucket {} does not exist", self.target.bucket),
            )),
            Err(e) => Err(transport_error(
                "",
                format!("failed to access bucket {}: {e}", self.target.bucket),
            )),
        }
    }

    fn put(&self, key: &str, body: &mut dyn Read, size_hint: u64, options: &PutOptions) -> Result<()> {
        let mut content = Vec::with_capacity(usize::try_from(size_hint).unwrap_or(0));
        body.read_to_end(&mut content)
            .map_err(|e| SsbError::io(key, e))?;
        if content.len() as u64 != size_hint {
            return Err(transport_error(
                key,
                format!(
                    "content length mismatch: expected {size_hint} bytes, read {}",
                    content.len()
                ),
            ));
        }

        let mut bucket = self.bucket.clone();
        bucket.add_header(ACL_HEADER, options.acl.as_str());
        let response = bucket
            .put_object(key, &content)
            .map_err(|e| transport_error(key, e))?;
        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(transport_error(key, format!("PUT returned HTTP {status}")));
        }
        Ok(())
    }
}
