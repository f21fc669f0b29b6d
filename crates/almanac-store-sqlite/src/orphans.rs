//! Removal of rows whose event no longer exists.

use almanac_core::OrphanCounts;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::{Result, schema::tables};

/// Delete rows of `table` whose `event_id` matches no event.
///
/// Rows with a NULL `event_id` match nothing and are removed as well.
pub fn sweep_table(conn: &Connection, table: &str) -> Result<usize> {
  let deleted = conn.execute(
    &format!(
      "DELETE FROM {table} WHERE _id IN (
         SELECT {table}._id FROM {table}
           LEFT OUTER JOIN Events ON {table}.event_id = Events._id
          WHERE Events._id IS NULL
       )"
    ),
    [],
  )?;
  if deleted > 0 {
    info!(table, deleted, "deleted orphaned rows");
  }
  Ok(deleted)
}

/// Sweep every table that hangs off `Events`.
pub fn sweep(conn: &Connection) -> Result<OrphanCounts> {
  debug!("checking for orphaned rows");
  Ok(OrphanCounts {
    attendees:           sweep_table(conn, tables::ATTENDEES)?,
    reminders:           sweep_table(conn, tables::REMINDERS)?,
    instances:           sweep_table(conn, tables::INSTANCES)?,
    alerts:              sweep_table(conn, tables::CALENDAR_ALERTS)?,
    extended_properties: sweep_table(conn, tables::EXTENDED_PROPERTIES)?,
    raw_times:           sweep_table(conn, tables::EVENTS_RAW_TIMES)?,
  })
}
