//! The schema version tag stored alongside a database file.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer tag identifying the shape of a database's tables, indexes,
/// triggers and views.
///
/// Versions only move forward. The one exception is a full rebuild, which
/// resets the file to whatever version the engine was built for.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SchemaVersion(pub u32);

impl SchemaVersion {
  /// The version of a file that has never been initialised.
  pub const EMPTY: Self = Self(0);

  pub const fn get(self) -> u32 { self.0 }

  /// `true` for a brand-new file with no schema at all.
  pub const fn is_empty(self) -> bool { self.0 == 0 }
}

impl From<u32> for SchemaVersion {
  fn from(v: u32) -> Self { Self(v) }
}

impl From<SchemaVersion> for u32 {
  fn from(v: SchemaVersion) -> Self { v.0 }
}

impl fmt::Display for SchemaVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}
