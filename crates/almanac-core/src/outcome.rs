//! What an upgrade pass did to a database.
//!
//! A lossy rebuild is a successful outcome, not an error: the database ends
//! up usable at the target version. Callers learn that local data was
//! discarded from [`MigrationOutcome::was_lossy`].

use serde::Serialize;

use crate::{SchemaVersion, SyncRequest};

// ─── Path ────────────────────────────────────────────────────────────────────

/// Why the engine discarded existing data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RebuildReason {
  /// The stored version predates the oldest step in the chain.
  TooOld,
  /// The stored version is newer than the engine.
  Downgrade,
  /// No step is registered for this version.
  NoStep { version: u32 },
  /// A step failed; the pass was rolled back.
  StepFailed { version: u32, message: String },
  /// An operator asked for a rebuild.
  Requested,
}

/// How the database reached its target version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpgradePath {
  /// Already at the target; only the orphan sweep ran.
  Current,
  /// A brand-new file was bootstrapped.
  Created,
  /// The step chain ran to completion.
  Incremental { steps: usize },
  /// Everything was dropped and recreated.
  Rebuilt { reason: RebuildReason },
}

// ─── Orphans ─────────────────────────────────────────────────────────────────

/// Rows removed by the orphan sweep, per dependent table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrphanCounts {
  pub attendees:           usize,
  pub reminders:           usize,
  pub instances:           usize,
  pub alerts:              usize,
  pub extended_properties: usize,
  pub raw_times:           usize,
}

impl OrphanCounts {
  pub fn total(&self) -> usize {
    self.attendees
      + self.reminders
      + self.instances
      + self.alerts
      + self.extended_properties
      + self.raw_times
  }

  pub fn is_empty(&self) -> bool { self.total() == 0 }
}

// ─── Outcome ─────────────────────────────────────────────────────────────────

/// The result of one upgrade pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
  pub from:          SchemaVersion,
  pub to:            SchemaVersion,
  pub path:          UpgradePath,
  pub orphans:       OrphanCounts,
  /// Sync requests produced by the committed pass, in emission order.
  pub sync_requests: Vec<SyncRequest>,
}

impl MigrationOutcome {
  /// `true` when pre-existing data was discarded.
  pub fn was_lossy(&self) -> bool { matches!(self.path, UpgradePath::Rebuilt { .. }) }

  /// Number of historical steps applied.
  pub fn steps_applied(&self) -> usize {
    match self.path {
      UpgradePath::Incremental { steps } => steps,
      _ => 0,
    }
  }
}
