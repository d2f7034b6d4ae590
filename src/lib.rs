#![forbid(unsafe_code)]

//! Storage Safe Backup (ssb) - backup sessions that never let the destination
//! run out of space.
//!
//! A session accepts files for safekeeping and, in the background, keeps the
//! destination healthy:
//! 1. **Size accounting** - bytes written since the last capacity check are summed lock-free
//! 2. **Capacity trigger** - a fresh disk probe decides when a cleanup pass is due; at most one runs at a time
//! 3. **Completion barrier** - callers wait, with deadline or cancellation, for every background task
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use storage_safe_backup::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use storage_safe_backup::core::config::SessionConfig;
//! use storage_safe_backup::session::local::LocalBackupSession;
//! ```

pub mod prelude;

pub mod core;
pub mod logger;
pub mod platform;
pub mod reclaim;
pub mod session;
pub mod transport;
