//! The historical upgrade chain.
//!
//! [`STEPS`] is sorted by source version. Each entry moves the schema from
//! `from` to `to`; most advance by one, a few jump over version numbers that
//! were never shipped. Step bodies describe the schema as it was at the
//! time, so they spell out their own DDL rather than reusing the current
//! definitions in [`crate::schema`].

use std::fmt;

use almanac_core::{Account, SyncRequest};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::{
  Result,
  cache,
  driver::MigrationContext,
  repair,
  schema::{self, ViewShape},
  sync_state,
};

pub type StepFn = fn(&Connection, &mut MigrationContext<'_>) -> Result<()>;

#[derive(Clone, Copy)]
pub struct Step {
  pub from:        u32,
  pub to:          u32,
  pub description: &'static str,
  /// Needs the one-time resync before it runs.
  pub resync:      bool,
  pub apply:       StepFn,
}

impl fmt::Debug for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Step")
      .field("from", &self.from)
      .field("to", &self.to)
      .field("description", &self.description)
      .field("resync", &self.resync)
      .finish_non_exhaustive()
  }
}

const fn step(from: u32, to: u32, description: &'static str, apply: StepFn) -> Step {
  Step { from, to, description, resync: false, apply }
}

const fn resync_step(from: u32, to: u32, description: &'static str, apply: StepFn) -> Step {
  Step { from, to, description, resync: true, apply }
}

pub const STEPS: &[Step] = &[
  step(50, 51, "DeletedEvents.calendar_id", to_51),
  step(51, 52, "Events.originalAllDay", to_52),
  step(52, 53, "CalendarAlerts timestamps", to_53),
  step(53, 54, "sync account index", to_54),
  step(54, 55, "sync account types", to_55),
  resync_step(55, 56, "calendar owners and attendee data", to_56),
  resync_step(56, 57, "guest permissions and organizer", to_57),
  step(57, 58, "reverted at 60", no_op),
  step(58, 59, "drop BusyBits, rebuild CalendarMetaData", to_59),
  step(59, 60, "sync state format, deleted events", to_60),
  step(60, 61, "CalendarCache", to_61),
  step(61, 62, "all-day events in the calendar's zone", to_62),
  step(62, 63, "events view", legacy_view),
  step(63, 64, "Events.syncAdapterData", to_64),
  step(64, 65, "events view", legacy_view),
  step(65, 66, "Calendars.organizerCanRespond", to_66),
  step(66, 67, "CalendarMetaData primary key", no_op),
  step(67, 69, "all-day event repair", to_69),
  step(68, 69, "all-day event repair", to_69),
  step(69, 100, "cache row ids", to_100),
  step(70, 100, "release 70 already has stable cache row ids", no_op),
  step(100, 101, "instance timezone keys", to_101),
  step(101, 102, "Events AUTOINCREMENT", to_102),
  step(102, 103, "calendar urls and deleted flag", to_103),
  step(103, 104, "events view with eventsUrl", current_view),
];

/// The step registered at `version`, if any.
pub fn find(version: u32) -> Option<&'static Step> {
  STEPS
    .binary_search_by_key(&version, |step| step.from)
    .ok()
    .map(|i| &STEPS[i])
}

// ─── Resync ──────────────────────────────────────────────────────────────────

/// Forget all sync state and ask for a sync of every account-owned calendar.
///
/// Calendars without both an account name and type are skipped.
pub fn resync(conn: &Connection, ctx: &mut MigrationContext<'_>) -> Result<()> {
  let cleared = sync_state::clear(conn)?;

  let calendars: Vec<(Option<String>, Option<String>, Option<String>)> = {
    let mut stmt =
      conn.prepare("SELECT _sync_account, _sync_account_type, url FROM Calendars")?;
    stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
      .collect::<rusqlite::Result<_>>()?
  };

  let mut scheduled = 0;
  for (name, kind, url) in calendars {
    let (Some(name), Some(kind)) = (name, kind) else {
      continue;
    };
    let mut request = SyncRequest::for_account(Account::new(name, kind));
    if let Some(url) = url {
      request = request.with_feed(url);
    }
    ctx.request_sync(request);
    scheduled += 1;
  }

  info!(cleared, scheduled, "scheduled resync");
  Ok(())
}

// ─── Step bodies ─────────────────────────────────────────────────────────────

fn no_op(_: &Connection, _: &mut MigrationContext<'_>) -> Result<()> { Ok(()) }

fn legacy_view(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  schema::create_events_view(conn, ViewShape::Legacy)?;
  Ok(())
}

fn current_view(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  schema::create_events_view(conn, ViewShape::Current)?;
  Ok(())
}

fn to_51(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  // Existing rows keep a NULL calendar_id. They are transient.
  conn.execute_batch(
    "ALTER TABLE DeletedEvents ADD COLUMN calendar_id INTEGER;

     DROP TRIGGER IF EXISTS calendar_cleanup;
     CREATE TRIGGER calendar_cleanup DELETE ON Calendars
     BEGIN
         DELETE FROM Events WHERE calendar_id = old._id;
         DELETE FROM DeletedEvents WHERE calendar_id = old._id;
     END;

     DROP TRIGGER IF EXISTS event_to_deleted;",
  )?;
  Ok(())
}

fn to_52(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  conn.execute_batch("ALTER TABLE Events ADD COLUMN originalAllDay INTEGER;")?;
  let filled = repair::backfill_original_all_day(conn)?;
  debug!(filled, "backfilled originalAllDay");
  Ok(())
}

fn to_53(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  conn.execute_batch(
    "ALTER TABLE CalendarAlerts ADD COLUMN creationTime INTEGER DEFAULT 0;
     ALTER TABLE CalendarAlerts ADD COLUMN receivedTime INTEGER DEFAULT 0;
     ALTER TABLE CalendarAlerts ADD COLUMN notifyTime INTEGER DEFAULT 0;",
  )?;
  Ok(())
}

fn to_54(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  conn.execute_batch(
    "CREATE INDEX eventSyncAccountAndIdIndex ON Events (_sync_account, _sync_id);",
  )?;
  Ok(())
}

fn to_55(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  // Every account before 55 was a Google account.
  conn.execute_batch(
    "ALTER TABLE Calendars ADD COLUMN _sync_account_type TEXT;
     ALTER TABLE Events ADD COLUMN _sync_account_type TEXT;
     ALTER TABLE DeletedEvents ADD COLUMN _sync_account_type TEXT;

     UPDATE Calendars SET _sync_account_type = 'com.google' WHERE _sync_account IS NOT NULL;
     UPDATE Events SET _sync_account_type = 'com.google' WHERE _sync_account IS NOT NULL;
     UPDATE DeletedEvents SET _sync_account_type = 'com.google' WHERE _sync_account IS NOT NULL;

     DROP INDEX eventSyncAccountAndIdIndex;
     CREATE INDEX eventSyncAccountAndIdIndex
         ON Events (_sync_account_type, _sync_account, _sync_id);",
  )?;
  Ok(())
}

fn to_56(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  // No local event may be uploaded before it has been pulled again with its
  // attendees.
  conn.execute_batch(
    "ALTER TABLE Calendars ADD COLUMN ownerAccount TEXT;
     ALTER TABLE Events ADD COLUMN hasAttendeeData INTEGER;

     UPDATE Events
        SET _sync_dirty   = 0,
            _sync_version = NULL,
            _sync_id      = REPLACE(_sync_id, '/private/full-selfattendance', '/private/full'),
            commentsUri   = REPLACE(commentsUri, '/private/full-selfattendance', '/private/full');

     UPDATE Calendars
        SET url = REPLACE(url, '/private/full-selfattendance', '/private/full');",
  )?;
  let owners = repair::backfill_calendar_owners(conn)?;
  debug!(owners, "backfilled calendar owners");
  Ok(())
}

fn to_57(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  conn.execute_batch(
    "ALTER TABLE Events ADD COLUMN guestsCanModify INTEGER NOT NULL DEFAULT 0;
     ALTER TABLE Events ADD COLUMN guestsCanInviteOthers INTEGER NOT NULL DEFAULT 1;
     ALTER TABLE Events ADD COLUMN guestsCanSeeGuests INTEGER NOT NULL DEFAULT 1;
     ALTER TABLE Events ADD COLUMN organizer STRING;",
  )?;
  conn.execute(
    "UPDATE Events
        SET organizer = (SELECT attendeeEmail FROM Attendees
                          WHERE Attendees.event_id = Events._id
                            AND Attendees.attendeeRelationship = ?1)",
    rusqlite::params![schema::attendees::RELATIONSHIP_ORGANIZER],
  )?;
  Ok(())
}

fn to_59(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  conn.execute_batch(
    "DROP TABLE IF EXISTS BusyBits;

     CREATE TEMPORARY TABLE CalendarMetaData_Backup (
         _id, localTimezone, minInstance, maxInstance
     );
     INSERT INTO CalendarMetaData_Backup
       SELECT _id, localTimezone, minInstance, maxInstance FROM CalendarMetaData;
     DROP TABLE CalendarMetaData;",
  )?;
  conn.execute_batch(schema::CREATE_CALENDAR_META_DATA)?;
  conn.execute_batch(
    "INSERT INTO CalendarMetaData
       SELECT _id, localTimezone, minInstance, maxInstance FROM CalendarMetaData_Backup;
     DROP TABLE CalendarMetaData_Backup;",
  )?;
  Ok(())
}

fn to_60(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  sync_state::upgrade_legacy(conn)?;

  conn.execute_batch("DROP TRIGGER IF EXISTS calendar_cleanup;")?;
  conn.execute_batch(schema::CALENDAR_CLEANUP_TRIGGER)?;

  conn.execute_batch(
    "ALTER TABLE Events ADD COLUMN deleted INTEGER NOT NULL DEFAULT 0;
     DROP TRIGGER IF EXISTS events_insert;",
  )?;
  conn.execute_batch(schema::EVENTS_INSERT_TRIGGER)?;

  conn.execute_batch(
    "DROP TABLE IF EXISTS DeletedEvents;
     DROP TRIGGER IF EXISTS events_cleanup_delete;",
  )?;
  conn.execute_batch(schema::EVENTS_CLEANUP_TRIGGER)?;

  // Dirty-marking triggers from before deletions were soft.
  conn.execute_batch(
    "DROP TRIGGER IF EXISTS attendees_update;
     DROP TRIGGER IF EXISTS attendees_insert;
     DROP TRIGGER IF EXISTS attendees_delete;
     DROP TRIGGER IF EXISTS reminders_update;
     DROP TRIGGER IF EXISTS reminders_insert;
     DROP TRIGGER IF EXISTS reminders_delete;
     DROP TRIGGER IF EXISTS extended_properties_update;
     DROP TRIGGER IF EXISTS extended_properties_insert;
     DROP TRIGGER IF EXISTS extended_properties_delete;",
  )?;

  schema::create_events_view(conn, ViewShape::Legacy)?;
  Ok(())
}

fn to_61(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  // Row ids here are autoassigned; 69 -> 100 moves them onto stable ids.
  conn.execute_batch("DROP TABLE IF EXISTS CalendarCache;")?;
  conn.execute_batch(cache::CREATE_CALENDAR_CACHE)?;
  conn.execute(
    "INSERT INTO CalendarCache (key, value) VALUES (?1, ?2)",
    rusqlite::params![
      cache::KEY_TIMEZONE_DATABASE_VERSION,
      cache::DEFAULT_TIMEZONE_DATABASE_VERSION
    ],
  )?;
  Ok(())
}

fn to_62(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  conn.execute_batch(
    "ALTER TABLE Events ADD COLUMN dtstart2 INTEGER;
     ALTER TABLE Events ADD COLUMN dtend2 INTEGER;
     ALTER TABLE Events ADD COLUMN eventTimezone2 TEXT;

     UPDATE Events
        SET dtstart2 = dtstart, dtend2 = dtend, eventTimezone2 = eventTimezone
      WHERE allDay = 0;",
  )?;
  let localized = repair::localize_all_day_times(conn)?;
  debug!(localized, "moved all-day events into calendar zones");
  Ok(())
}

fn to_64(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  conn.execute_batch("ALTER TABLE Events ADD COLUMN syncAdapterData TEXT;")?;
  Ok(())
}

fn to_66(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  conn.execute_batch(
    "ALTER TABLE Calendars ADD COLUMN organizerCanRespond INTEGER NOT NULL DEFAULT 1;",
  )?;
  Ok(())
}

fn to_69(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  let repaired = repair::repair_all_day_events(conn)?;
  if repaired > 0 {
    info!(repaired, "repaired malformed all-day events");
  }
  Ok(())
}

fn to_100(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  cache::rekey(conn)?;
  Ok(())
}

fn to_101(conn: &Connection, ctx: &mut MigrationContext<'_>) -> Result<()> {
  cache::add_timezone_keys(conn, ctx.local_timezone())
}

/// Every `Events` column, in table order.
const EVENTS_COLUMNS: &str = "
    _id, _sync_account, _sync_account_type, _sync_id, _sync_version, _sync_time,
    _sync_local_id, _sync_dirty, _sync_mark, calendar_id, htmlUri, title,
    eventLocation, description, eventStatus, selfAttendeeStatus, commentsUri,
    dtstart, dtend, eventTimezone, duration, allDay, visibility, transparency,
    hasAlarm, hasExtendedProperties, rrule, rdate, exrule, exdate,
    originalEvent, originalInstanceTime, originalAllDay, lastDate,
    hasAttendeeData, guestsCanModify, guestsCanInviteOthers, guestsCanSeeGuests,
    organizer, deleted, dtstart2, dtend2, eventTimezone2, syncAdapterData";

/// The same columns read from the old table. `hasAttendeeData` was nullable
/// before this rebuild.
const EVENTS_BACKUP_COLUMNS: &str = "
    _id, _sync_account, _sync_account_type, _sync_id, _sync_version, _sync_time,
    _sync_local_id, _sync_dirty, _sync_mark, calendar_id, htmlUri, title,
    eventLocation, description, eventStatus, selfAttendeeStatus, commentsUri,
    dtstart, dtend, eventTimezone, duration, allDay, visibility, transparency,
    hasAlarm, hasExtendedProperties, rrule, rdate, exrule, exdate,
    originalEvent, originalInstanceTime, originalAllDay, lastDate,
    COALESCE(hasAttendeeData, 0), guestsCanModify, guestsCanInviteOthers, guestsCanSeeGuests,
    organizer, deleted, dtstart2, dtend2, eventTimezone2, syncAdapterData";

fn to_102(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  // Renaming rewrites the view and triggers that mention Events; they are
  // all recreated against the new table below.
  conn.execute_batch(
    "DROP VIEW IF EXISTS view_events;
     ALTER TABLE Events RENAME TO Events_Backup;
     DROP TRIGGER IF EXISTS events_cleanup_delete;
     DROP TRIGGER IF EXISTS events_insert;
     DROP INDEX IF EXISTS eventSyncAccountAndIdIndex;
     DROP INDEX IF EXISTS eventsCalendarIdIndex;",
  )?;

  conn.execute_batch(schema::CREATE_EVENTS_TABLE)?;
  conn.execute_batch(schema::CREATE_EVENTS_INDEXES)?;

  let copied = conn.execute(
    &format!(
      "INSERT INTO Events ({EVENTS_COLUMNS}) SELECT {EVENTS_BACKUP_COLUMNS} FROM Events_Backup"
    ),
    [],
  )?;
  conn.execute_batch("DROP TABLE Events_Backup;")?;

  conn.execute_batch("DROP TRIGGER IF EXISTS calendar_cleanup;")?;
  conn.execute_batch(schema::CALENDAR_CLEANUP_TRIGGER)?;
  conn.execute_batch(schema::EVENTS_INSERT_TRIGGER)?;
  conn.execute_batch(schema::EVENTS_CLEANUP_TRIGGER)?;
  schema::create_events_view(conn, ViewShape::Legacy)?;

  info!(copied, "rebuilt Events with an AUTOINCREMENT key");
  Ok(())
}

fn to_103(conn: &Connection, _: &mut MigrationContext<'_>) -> Result<()> {
  // The sync adapter fills in the new urls.
  conn.execute_batch(
    "ALTER TABLE Calendars ADD COLUMN deleted INTEGER NOT NULL DEFAULT 0;
     ALTER TABLE Calendars ADD COLUMN selfUrl TEXT;
     ALTER TABLE Calendars ADD COLUMN editUrl TEXT;
     ALTER TABLE Calendars ADD COLUMN eventsUrl TEXT;
     CREATE INDEX calendarsUrlIndex ON Calendars (url);",
  )?;
  schema::create_events_view(conn, ViewShape::Current)?;
  Ok(())
}
