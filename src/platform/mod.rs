//! Platform abstraction: capacity probes for destination filesystems.

pub mod pal;
