//! Creation of the current schema from nothing.

use almanac_core::SyncRequest;
use rusqlite::Connection;
use tracing::info;

use crate::{
  Result,
  cache,
  driver::MigrationContext,
  schema::{self, ViewShape},
  sync_state,
};

/// Drop the events view and every table this engine has ever owned.
pub fn drop_all(conn: &Connection) -> Result<()> {
  conn.execute_batch("DROP VIEW IF EXISTS view_events;")?;
  for table in schema::OWNED_TABLES {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
  }
  Ok(())
}

/// Replace whatever is in the database with an empty current schema.
///
/// Safe to run on an empty file and on an already bootstrapped one. Asks for
/// a sync of every account so the data can be pulled down again.
pub fn bootstrap(conn: &Connection, ctx: &mut MigrationContext<'_>) -> Result<()> {
  info!("bootstrapping calendar database");
  drop_all(conn)?;

  for ddl in [
    schema::CREATE_CALENDARS,
    schema::CREATE_EVENTS_TABLE,
    schema::CREATE_EVENTS_INDEXES,
    schema::CREATE_EVENTS_RAW_TIMES,
    schema::CREATE_INSTANCES,
    schema::CREATE_CALENDAR_META_DATA,
    schema::CREATE_ATTENDEES,
    schema::CREATE_REMINDERS,
    schema::CREATE_CALENDAR_ALERTS,
    schema::CREATE_EXTENDED_PROPERTIES,
    // Triggers last; they mention the tables above.
    schema::CALENDAR_CLEANUP_TRIGGER,
    schema::EVENTS_INSERT_TRIGGER,
    schema::EVENTS_CLEANUP_TRIGGER,
  ] {
    conn.execute_batch(ddl)?;
  }
  schema::create_events_view(conn, ViewShape::Current)?;

  sync_state::create(conn)?;
  cache::initialise(conn, ctx.local_timezone())?;

  ctx.request_sync(SyncRequest::all_accounts());
  Ok(())
}
