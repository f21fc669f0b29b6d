//! The upgrade pass.
//!
//! A pass reads the stored version, walks [`crate::steps::STEPS`] up to the
//! target, checks the sync state tables, sweeps orphans, and stamps the new
//! version inside one transaction. If anything fails the transaction is rolled back and the
//! database is rebuilt empty in a second transaction. Losing local data is
//! acceptable; the sync layer can pull it down again.

use almanac_core::{MigrationOutcome, RebuildReason, SchemaVersion, SyncRequest, UpgradePath};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, error, info, warn};

use crate::{
  Error, Result,
  bootstrap,
  datetime::parse_zone,
  orphans,
  schema::{self, OLDEST_SUPPORTED_VERSION},
  steps, sync_state,
};

/// Starting versions that shipped `CalendarMetaData` without a primary key.
const BROKEN_META_DATA: std::ops::RangeInclusive<u32> = 59..=66;

// ─── Options ─────────────────────────────────────────────────────────────────

/// Host facts the engine needs but cannot discover from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOptions {
  /// IANA name of the zone instances are expanded in by default.
  pub local_timezone: String,
}

impl MigrationOptions {
  /// Options with an explicit local zone, which must be a known IANA name.
  pub fn with_local_timezone(zone: impl Into<String>) -> Result<Self> {
    let zone = zone.into();
    if parse_zone(&zone).is_none() {
      return Err(Error::UnknownTimezone(zone));
    }
    Ok(Self { local_timezone: zone })
  }
}

impl Default for MigrationOptions {
  /// The host's zone, or UTC if it cannot be determined.
  fn default() -> Self {
    let local_timezone = iana_time_zone::get_timezone()
      .ok()
      .filter(|zone| parse_zone(zone).is_some())
      .unwrap_or_else(|| "UTC".to_owned());
    Self { local_timezone }
  }
}

// ─── Context ─────────────────────────────────────────────────────────────────

/// State carried through one pass.
#[derive(Debug)]
pub struct MigrationContext<'a> {
  options:  &'a MigrationOptions,
  requests: Vec<SyncRequest>,
  resynced: bool,
}

impl<'a> MigrationContext<'a> {
  pub fn new(options: &'a MigrationOptions) -> Self {
    Self { options, requests: Vec::new(), resynced: false }
  }

  pub fn local_timezone(&self) -> &str { &self.options.local_timezone }

  /// Buffer a sync request. Nothing is delivered until the pass commits.
  pub fn request_sync(&mut self, request: SyncRequest) { self.requests.push(request); }

  pub fn requests(&self) -> &[SyncRequest] { &self.requests }

  pub fn into_requests(self) -> Vec<SyncRequest> { self.requests }
}

// ─── Passes ──────────────────────────────────────────────────────────────────

/// A failed walk, attributed to the version it was at.
#[derive(Debug)]
struct WalkFailure {
  version: u32,
  error:   Error,
}

trait AtVersion<T> {
  fn at(self, version: u32) -> Result<T, WalkFailure>;
}

impl<T, E: Into<Error>> AtVersion<T> for Result<T, E> {
  fn at(self, version: u32) -> Result<T, WalkFailure> {
    self.map_err(|e| WalkFailure { version, error: e.into() })
  }
}

/// Bring the database from `current` to `target`.
///
/// Only a failure of the fallback rebuild is returned as an error; every
/// other problem ends in a lossy rebuild reported through
/// [`MigrationOutcome::path`].
pub fn upgrade(
  conn: &mut Connection,
  current: u32,
  target: u32,
  options: &MigrationOptions,
) -> Result<MigrationOutcome> {
  info!(from = current, to = target, "upgrading calendar database");

  if current == 0 {
    return rebuild_pass(conn, current, target, options, UpgradePath::Created);
  }
  if current < OLDEST_SUPPORTED_VERSION {
    warn!(version = current, "database too old to upgrade, rebuilding");
    return rebuild_pass(conn, current, target, options, rebuilt(RebuildReason::TooOld));
  }
  if current > target {
    warn!(version = current, target, "database is newer than this engine, rebuilding");
    return rebuild_pass(conn, current, target, options, rebuilt(RebuildReason::Downgrade));
  }

  match walk(conn, current, target, options) {
    Ok(outcome) => Ok(outcome),
    Err(WalkFailure { version, error: Error::NoStep(_) | Error::Overshoot { .. } }) => {
      warn!(version, "no upgrade path, rebuilding");
      rebuild_pass(conn, current, target, options, rebuilt(RebuildReason::NoStep { version }))
    }
    Err(WalkFailure { version, error }) => {
      error!(version, %error, "upgrade step failed, rebuilding");
      let reason = RebuildReason::StepFailed { version, message: error.to_string() };
      rebuild_pass(conn, current, target, options, rebuilt(reason))
    }
  }
}

/// [`upgrade`] from whatever version the database is stamped with.
///
/// A negative stamp is no version this engine ever wrote, so it is treated
/// as too old and reported as coming from version 0.
pub fn upgrade_stored(
  conn: &mut Connection,
  target: u32,
  options: &MigrationOptions,
) -> Result<MigrationOutcome> {
  let raw = schema::raw_version(conn)?;
  match u32::try_from(raw) {
    Ok(current) => upgrade(conn, current, target, options),
    Err(_) => {
      warn!(version = raw, "negative database version, rebuilding");
      rebuild_pass(conn, 0, target, options, rebuilt(RebuildReason::TooOld))
    }
  }
}

/// Discard everything and bootstrap at `target`, whatever the stored version.
pub fn rebuild(
  conn: &mut Connection,
  target: u32,
  options: &MigrationOptions,
) -> Result<MigrationOutcome> {
  let raw = schema::raw_version(conn)?;
  warn!(version = raw, "rebuild requested");
  let current = u32::try_from(raw).unwrap_or(0);
  rebuild_pass(conn, current, target, options, rebuilt(RebuildReason::Requested))
}

fn rebuilt(reason: RebuildReason) -> UpgradePath { UpgradePath::Rebuilt { reason } }

fn walk(
  conn: &mut Connection,
  current: u32,
  target: u32,
  options: &MigrationOptions,
) -> Result<MigrationOutcome, WalkFailure> {
  let tx = conn
    .transaction_with_behavior(TransactionBehavior::Immediate)
    .at(current)?;
  let mut ctx = MigrationContext::new(options);

  let mut version = current;
  let mut applied = 0;
  while version < target {
    let step = steps::find(version).ok_or(Error::NoStep(version)).at(version)?;
    if step.to > target {
      let error = Error::Overshoot { from: step.from, to: step.to, target };
      return Err(WalkFailure { version, error });
    }

    if step.resync && !ctx.resynced {
      steps::resync(&tx, &mut ctx).at(version)?;
      ctx.resynced = true;
    }

    debug!(from = step.from, to = step.to, step = step.description, "applying upgrade step");
    (step.apply)(&tx, &mut ctx).at(version)?;
    version = step.to;
    applied += 1;
  }

  if BROKEN_META_DATA.contains(&current) {
    recreate_meta_data_and_instances(&tx).at(version)?;
  }

  if target >= sync_state::CURRENT_SINCE && sync_state::ensure_current(&tx).at(version)? {
    ctx.request_sync(SyncRequest::all_accounts());
  }

  let orphans = orphans::sweep(&tx).at(version)?;
  schema::set_version(&tx, target).at(version)?;
  tx.commit().at(version)?;

  let path = match applied {
    0 => UpgradePath::Current,
    n => UpgradePath::Incremental { steps: n },
  };
  info!(from = current, to = target, steps = applied, "upgrade complete");

  Ok(MigrationOutcome {
    from: current.into(),
    to: target.into(),
    path,
    orphans,
    sync_requests: ctx.into_requests(),
  })
}

/// Give `CalendarMetaData` its primary key back and force instances to be
/// expanded again, since they were computed from duplicated metadata rows.
fn recreate_meta_data_and_instances(conn: &Connection) -> Result<()> {
  info!("recreating CalendarMetaData and clearing Instances");
  conn.execute_batch("DROP TABLE CalendarMetaData;")?;
  conn.execute_batch(schema::CREATE_CALENDAR_META_DATA)?;
  conn.execute_batch("DELETE FROM Instances;")?;
  Ok(())
}

fn rebuild_pass(
  conn: &mut Connection,
  current: u32,
  target: u32,
  options: &MigrationOptions,
  path: UpgradePath,
) -> Result<MigrationOutcome> {
  let attempt = |conn: &mut Connection| -> Result<MigrationOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut ctx = MigrationContext::new(options);

    bootstrap::bootstrap(&tx, &mut ctx)?;
    let orphans = orphans::sweep(&tx)?;
    schema::set_version(&tx, target)?;
    tx.commit()?;

    Ok(MigrationOutcome {
      from: SchemaVersion(current),
      to: SchemaVersion(target),
      path: path.clone(),
      orphans,
      sync_requests: ctx.into_requests(),
    })
  };

  attempt(conn).map_err(|e| {
    error!(error = %e, "rebuilding the calendar database failed");
    Error::Rebuild(Box::new(e))
  })
}
