//! Activity logging: event stream handle + append-only JSONL writer.

pub mod activity;
pub mod jsonl;
