//! Error type for `almanac-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  /// The walk reached a version with no registered step.
  #[error("no migration step registered for version {0}")]
  NoStep(u32),

  /// The step registered at `from` jumps past the requested target.
  #[error("step {from} -> {to} overshoots target version {target}")]
  Overshoot { from: u32, to: u32, target: u32 },

  #[error("unknown timezone: {0:?}")]
  UnknownTimezone(String),

  /// Even the fresh schema could not be created. There is no further
  /// fallback.
  #[error("rebuild failed: {0}")]
  Rebuild(#[source] Box<Error>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
