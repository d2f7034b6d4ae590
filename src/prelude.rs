//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use storage_safe_backup::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, RemoteConfig, SessionConfig};
pub use crate::core::errors::{Result, SsbError};

// Platform
pub use crate::platform::pal::{CapacityProbe, DiskUsage, MockProbe, StatvfsProbe};

// Logger
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger};

// Reclaim
pub use crate::reclaim::age_ordered::AgeOrderedReclaimer;
pub use crate::reclaim::{ReclaimEngine, ReclaimOptions, ReclaimReport};

// Session
pub use crate::session::coordinator::{CapacityCoordinator, Collaborators};
pub use crate::session::local::LocalBackupSession;
pub use crate::session::remote::{RemoteBackupSession, TransferFailure};
pub use crate::session::{BackupSession, CancelToken, CleaningState, SessionStats};

// Transport
pub use crate::transport::directory::DirectoryObjectStore;
#[cfg(feature = "s3")]
pub use crate::transport::s3::S3Transport;
pub use crate::transport::{ObjectAcl, ObjectStoreKind, ObjectTransport, PutOptions};
