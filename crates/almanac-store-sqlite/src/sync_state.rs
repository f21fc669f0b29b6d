//! Per-account sync bookkeeping shared with the sync layer.
//!
//! The engine only ever creates, clears, or reformats these tables. What goes
//! into `data` belongs to the sync adapters.

use rusqlite::{Connection, OptionalExtension as _};
use tracing::{info, warn};

use crate::{
  Result,
  schema::{self, tables},
};

/// Format written by this engine.
pub const FORMAT_VERSION: i64 = 1;

/// First schema version whose sync state is in [`FORMAT_VERSION`].
pub const CURRENT_SINCE: u32 = 60;

/// Format used before release 60, keyed on the `_sync_account` columns.
pub const LEGACY_FORMAT_VERSION: i64 = 3;

const CREATE_SYNC_STATE: &str = "
DROP TABLE IF EXISTS _sync_state;
DROP TABLE IF EXISTS _sync_state_metadata;

CREATE TABLE _sync_state (
    _id          INTEGER PRIMARY KEY,
    account_name TEXT NOT NULL,
    account_type TEXT NOT NULL,
    data         TEXT,
    UNIQUE (account_name, account_type)
);

CREATE TABLE _sync_state_metadata (
    version INTEGER
);
";

/// Recreate both tables, empty, at [`FORMAT_VERSION`].
pub fn create(conn: &Connection) -> Result<()> {
  conn.execute_batch(CREATE_SYNC_STATE)?;
  conn.execute(
    "INSERT INTO _sync_state_metadata (version) VALUES (?1)",
    rusqlite::params![FORMAT_VERSION],
  )?;
  Ok(())
}

/// The stored format, or `None` if the metadata table is missing or empty.
pub fn format_version(conn: &Connection) -> Result<Option<i64>> {
  if !schema::table_exists(conn, tables::SYNC_STATE_META)? {
    return Ok(None);
  }
  let version = conn
    .query_row("SELECT version FROM _sync_state_metadata", [], |row| {
      row.get::<_, Option<i64>>(0)
    })
    .optional()?;
  Ok(version.flatten())
}

/// Recreate the tables if they are missing or in any other format.
///
/// Returns `true` when they were recreated, which discards stored state and
/// leads to a full resync.
pub fn ensure_current(conn: &Connection) -> Result<bool> {
  match format_version(conn)? {
    Some(FORMAT_VERSION) => Ok(false),
    found => {
      info!(?found, "recreating sync state tables");
      create(conn)?;
      Ok(true)
    }
  }
}

/// Move rows from the legacy format into the current one.
///
/// Rows without an account name or type cannot be carried over and are
/// dropped. Any format other than the legacy one is left for
/// [`ensure_current`] to recreate.
pub fn upgrade_legacy(conn: &Connection) -> Result<()> {
  let found = format_version(conn)?;
  if found != Some(LEGACY_FORMAT_VERSION) {
    warn!(?found, "sync state is not in the legacy format, skipping upgrade");
    return Ok(());
  }

  info!("upgrading sync state table");
  conn.execute_batch(
    "CREATE TEMPORARY TABLE state_backup (
         _sync_account      TEXT,
         _sync_account_type TEXT,
         data               TEXT
     );
     INSERT INTO state_backup
       SELECT _sync_account, _sync_account_type, data
         FROM _sync_state
        WHERE _sync_account IS NOT NULL AND _sync_account_type IS NOT NULL;",
  )?;
  create(conn)?;
  conn.execute_batch(
    "INSERT INTO _sync_state (account_name, account_type, data)
       SELECT _sync_account, _sync_account_type, data FROM state_backup;
     DROP TABLE state_backup;",
  )?;
  Ok(())
}

/// Forget every account's sync position.
pub fn clear(conn: &Connection) -> Result<usize> {
  if !schema::table_exists(conn, tables::SYNC_STATE)? {
    return Ok(0);
  }
  Ok(conn.execute("DELETE FROM _sync_state", [])?)
}
