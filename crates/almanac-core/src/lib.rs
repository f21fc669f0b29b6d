//! Core types for the Almanac calendar database.
//!
//! This crate is deliberately free of database dependencies. The SQLite
//! engine and the command-line front end both depend on it; it depends on
//! nothing but `serde`.

pub mod outcome;
pub mod sync;
pub mod version;

pub use outcome::{MigrationOutcome, OrphanCounts, RebuildReason, UpgradePath};
pub use sync::{Account, RecordingScheduler, SyncRequest, SyncScheduler};
pub use version::SchemaVersion;
