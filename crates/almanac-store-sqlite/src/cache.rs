//! The `CalendarCache` key-value table.
//!
//! Each key lives on a fixed row whose id is derived from the key itself, so
//! `INSERT OR REPLACE` collapses every write for a key onto one row. The id is
//! the 31-multiplier string hash over UTF-16 code units that earlier releases
//! used, which keeps rows written by them addressable.

use rusqlite::{Connection, OptionalExtension as _, params};
use tracing::{debug, info};

use crate::Result;

pub const KEY_TIMEZONE_DATABASE_VERSION: &str = "timezoneDatabaseVersion";
pub const DEFAULT_TIMEZONE_DATABASE_VERSION: &str = "2009s";

/// `auto` follows the device zone; `home` pins instances to a fixed zone.
pub const KEY_TIMEZONE_TYPE: &str = "timezoneType";
pub const TIMEZONE_TYPE_AUTO: &str = "auto";
pub const TIMEZONE_TYPE_HOME: &str = "home";

/// Zone used to expand instances.
pub const KEY_TIMEZONE_INSTANCES: &str = "timezoneInstances";
/// Zone instances were expanded in before the last change.
pub const KEY_TIMEZONE_INSTANCES_PREVIOUS: &str = "timezoneInstancesPrevious";

pub const CREATE_CALENDAR_CACHE: &str = "
CREATE TABLE IF NOT EXISTS CalendarCache (
    _id   INTEGER PRIMARY KEY,
    key   TEXT NOT NULL,
    value TEXT
);
";

/// Stable row id for `key`.
pub fn row_id(key: &str) -> i64 {
  key
    .encode_utf16()
    .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
    .into()
}

pub fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
  let value = conn
    .query_row(
      "SELECT value FROM CalendarCache WHERE key = ?1 ORDER BY _id LIMIT 1",
      params![key],
      |row| row.get::<_, Option<String>>(0),
    )
    .optional()?;
  Ok(value.flatten())
}

pub fn put(conn: &Connection, key: &str, value: &str) -> Result<()> {
  conn.execute(
    "INSERT OR REPLACE INTO CalendarCache (_id, key, value) VALUES (?1, ?2, ?3)",
    params![row_id(key), key, value],
  )?;
  Ok(())
}

/// Insert `key` only if its row is not there yet.
pub fn put_if_absent(conn: &Connection, key: &str, value: &str) -> Result<bool> {
  let inserted = conn.execute(
    "INSERT OR IGNORE INTO CalendarCache (_id, key, value) VALUES (?1, ?2, ?3)",
    params![row_id(key), key, value],
  )?;
  Ok(inserted > 0)
}

/// Every `(key, value)` pair in row order.
pub fn entries(conn: &Connection) -> Result<Vec<(String, Option<String>)>> {
  let mut stmt = conn.prepare("SELECT key, value FROM CalendarCache ORDER BY _id")?;
  let rows = stmt
    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

/// Create the table and fill in every well-known key, keeping values that
/// are already present.
pub fn initialise(conn: &Connection, local_timezone: &str) -> Result<()> {
  conn.execute_batch(CREATE_CALENDAR_CACHE)?;
  put_if_absent(
    conn,
    KEY_TIMEZONE_DATABASE_VERSION,
    DEFAULT_TIMEZONE_DATABASE_VERSION,
  )?;
  add_timezone_keys(conn, local_timezone)?;
  Ok(())
}

// ─── Repairs ─────────────────────────────────────────────────────────────────

/// Rewrite every row onto its stable id.
///
/// Releases before 100 inserted cache rows with autoassigned ids, so a key
/// could appear more than once. Rows are replayed in id order and the last
/// one for a key wins. The timezone database version is defaulted if it was
/// never written.
pub fn rekey(conn: &Connection) -> Result<usize> {
  let rows = entries(conn)?;
  conn.execute("DELETE FROM CalendarCache", [])?;

  for (key, value) in &rows {
    conn.execute(
      "INSERT OR REPLACE INTO CalendarCache (_id, key, value) VALUES (?1, ?2, ?3)",
      params![row_id(key), key, value],
    )?;
  }

  if put_if_absent(
    conn,
    KEY_TIMEZONE_DATABASE_VERSION,
    DEFAULT_TIMEZONE_DATABASE_VERSION,
  )? {
    debug!("cache had no timezone database version, using the default");
  }

  let kept = entries(conn)?.len();
  if kept != rows.len() {
    info!(before = rows.len(), after = kept, "collapsed duplicate cache keys");
  }
  Ok(kept)
}

/// Add the instance-timezone keys. Existing values are left alone.
pub fn add_timezone_keys(conn: &Connection, local_timezone: &str) -> Result<()> {
  put_if_absent(conn, KEY_TIMEZONE_TYPE, TIMEZONE_TYPE_AUTO)?;
  put_if_absent(conn, KEY_TIMEZONE_INSTANCES, local_timezone)?;
  put_if_absent(conn, KEY_TIMEZONE_INSTANCES_PREVIOUS, local_timezone)?;
  Ok(())
}
