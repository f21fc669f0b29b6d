//! Historical databases for tests.
//!
//! Only the version-50 shape is written out by hand. Every later version is
//! produced by running the real step chain, so tests exercise the same SQL a
//! user's database would go through.

use rusqlite::Connection;

use crate::{MigrationOptions, cache, driver, schema};

/// The schema as it shipped at version 50.
pub const SCHEMA_V50: &str = "
CREATE TABLE Calendars (
    _id            INTEGER PRIMARY KEY,
    _sync_account  TEXT,
    _sync_id       TEXT,
    _sync_version  TEXT,
    _sync_time     TEXT,
    _sync_local_id INTEGER,
    _sync_dirty    INTEGER,
    _sync_mark     INTEGER,
    url            TEXT,
    name           TEXT,
    displayName    TEXT,
    hidden         INTEGER NOT NULL DEFAULT 0,
    color          INTEGER,
    access_level   INTEGER,
    selected       INTEGER NOT NULL DEFAULT 1,
    sync_events    INTEGER NOT NULL DEFAULT 0,
    location       TEXT,
    timezone       TEXT
);

CREATE TABLE Events (
    _id                   INTEGER PRIMARY KEY,
    _sync_account         TEXT,
    _sync_id              TEXT,
    _sync_version         TEXT,
    _sync_time            TEXT,
    _sync_local_id        INTEGER,
    _sync_dirty           INTEGER,
    _sync_mark            INTEGER,
    calendar_id           INTEGER NOT NULL,
    htmlUri               TEXT,
    title                 TEXT,
    eventLocation         TEXT,
    description           TEXT,
    eventStatus           INTEGER,
    selfAttendeeStatus    INTEGER NOT NULL DEFAULT 0,
    commentsUri           TEXT,
    dtstart               INTEGER,
    dtend                 INTEGER,
    eventTimezone         TEXT,
    duration              TEXT,
    allDay                INTEGER NOT NULL DEFAULT 0,
    visibility            INTEGER NOT NULL DEFAULT 0,
    transparency          INTEGER NOT NULL DEFAULT 0,
    hasAlarm              INTEGER NOT NULL DEFAULT 0,
    hasExtendedProperties INTEGER NOT NULL DEFAULT 0,
    rrule                 TEXT,
    rdate                 TEXT,
    exrule                TEXT,
    exdate                TEXT,
    originalEvent         TEXT,
    originalInstanceTime  INTEGER,
    lastDate              INTEGER
);

CREATE INDEX eventsCalendarIdIndex ON Events (calendar_id);

CREATE TABLE EventsRawTimes (
    _id                      INTEGER PRIMARY KEY,
    event_id                 INTEGER NOT NULL,
    dtstart2445              TEXT,
    dtend2445                TEXT,
    originalInstanceTime2445 TEXT,
    lastDate2445             TEXT,
    UNIQUE (event_id)
);

CREATE TABLE DeletedEvents (
    _sync_id      TEXT,
    _sync_version TEXT,
    _sync_account TEXT,
    _sync_mark    INTEGER
);

CREATE TABLE Instances (
    _id         INTEGER PRIMARY KEY,
    event_id    INTEGER,
    begin       INTEGER,
    end         INTEGER,
    startDay    INTEGER,
    endDay      INTEGER,
    startMinute INTEGER,
    endMinute   INTEGER,
    UNIQUE (event_id, begin, end)
);

CREATE INDEX instancesStartDayIndex ON Instances (startDay);

CREATE TABLE CalendarMetaData (
    _id           INTEGER,
    localTimezone TEXT,
    minInstance   INTEGER,
    maxInstance   INTEGER
);

CREATE TABLE BusyBits (
    day         INTEGER PRIMARY KEY,
    busyBits    INTEGER,
    allDayCount INTEGER
);

CREATE TABLE Attendees (
    _id                  INTEGER PRIMARY KEY,
    event_id             INTEGER,
    attendeeName         TEXT,
    attendeeEmail        TEXT,
    attendeeStatus       INTEGER,
    attendeeRelationship INTEGER,
    attendeeType         INTEGER
);

CREATE INDEX attendeesEventIdIndex ON Attendees (event_id);

CREATE TABLE Reminders (
    _id      INTEGER PRIMARY KEY,
    event_id INTEGER,
    minutes  INTEGER,
    method   INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX remindersEventIdIndex ON Reminders (event_id);

CREATE TABLE CalendarAlerts (
    _id       INTEGER PRIMARY KEY,
    event_id  INTEGER,
    begin     INTEGER NOT NULL,
    end       INTEGER NOT NULL,
    alarmTime INTEGER NOT NULL,
    state     INTEGER NOT NULL,
    minutes   INTEGER,
    UNIQUE (alarmTime, begin, event_id)
);

CREATE INDEX calendarAlertsEventIdIndex ON CalendarAlerts (event_id);

CREATE TABLE ExtendedProperties (
    _id      INTEGER PRIMARY KEY,
    event_id INTEGER,
    name     TEXT,
    value    TEXT
);

CREATE INDEX extendedPropertiesEventIdIndex ON ExtendedProperties (event_id);

CREATE TABLE _sync_state (
    _id                INTEGER PRIMARY KEY,
    _sync_account      TEXT,
    _sync_account_type TEXT,
    data               TEXT,
    UNIQUE (_sync_account, _sync_account_type)
);

CREATE TABLE _sync_state_metadata (version INTEGER);
INSERT INTO _sync_state_metadata (version) VALUES (3);

CREATE TRIGGER calendar_cleanup DELETE ON Calendars
BEGIN
    DELETE FROM Events WHERE calendar_id = old._id;
END;

CREATE TRIGGER events_cleanup_delete DELETE ON Events
BEGIN
    DELETE FROM Instances WHERE event_id = old._id;
    DELETE FROM EventsRawTimes WHERE event_id = old._id;
    DELETE FROM Attendees WHERE event_id = old._id;
    DELETE FROM Reminders WHERE event_id = old._id;
    DELETE FROM CalendarAlerts WHERE event_id = old._id;
    DELETE FROM ExtendedProperties WHERE event_id = old._id;
END;

CREATE TRIGGER event_to_deleted DELETE ON Events
BEGIN
    INSERT INTO DeletedEvents (_sync_id, _sync_version, _sync_account)
      SELECT old._sync_id, old._sync_version, old._sync_account
       WHERE old._sync_id IS NOT NULL;
END;

CREATE TRIGGER attendees_insert INSERT ON Attendees
BEGIN
    UPDATE Events SET _sync_dirty = 1 WHERE Events._id = new.event_id;
END;

CREATE TRIGGER reminders_insert INSERT ON Reminders
BEGIN
    UPDATE Events SET _sync_dirty = 1 WHERE Events._id = new.event_id;
END;

CREATE TRIGGER extended_properties_insert INSERT ON ExtendedProperties
BEGIN
    UPDATE Events SET _sync_dirty = 1 WHERE Events._id = new.event_id;
END;

PRAGMA user_version = 50;
";

// 2010-03-15 in a few zones.
pub const UTC_MIDNIGHT: i64 = 1268611200000;
pub const UTC_MORNING: i64 = 1268649000000;
pub const UTC_NEXT_DAY: i64 = 1268697600000;
pub const LA_MIDNIGHT: i64 = 1268636400000;

pub const OWNER_FEED: &str =
  "https://www.google.com/calendar/feeds/alice%40example.com/private/full-selfattendance";

/// A small, realistic data set in the version-50 shape.
///
/// | id | calendar | what |
/// |---|---|---|
/// | 1 | 1 | timed event with an organizer and a guest |
/// | 2 | 1 | clean all-day event |
/// | 3 | 1 | recurring all-day event stored at 10:30 with `P3600S` |
/// | 4 | 1 | exception to event 1 |
///
/// Calendar 2 is local and has no account.
pub const SEED_V50: &str = "
INSERT INTO Calendars (_id, _sync_account, url, name, displayName, timezone, sync_events)
  VALUES (1, 'alice@example.com',
          'https://www.google.com/calendar/feeds/alice%40example.com/private/full-selfattendance',
          'alice', 'Alice', 'America/Los_Angeles', 1);
INSERT INTO Calendars (_id, name, displayName, timezone)
  VALUES (2, 'local', 'On this device', 'Europe/Paris');

INSERT INTO Events (_id, _sync_account, _sync_id, _sync_version, _sync_dirty,
                    calendar_id, title, dtstart, dtend, eventTimezone, allDay)
  VALUES (1, 'alice@example.com',
          'https://www.google.com/calendar/feeds/alice%40example.com/private/full-selfattendance/standup',
          '7', 1, 1, 'Standup', 1268649000000, 1268650800000, 'America/Los_Angeles', 0);
INSERT INTO Events (_id, _sync_account, _sync_id, calendar_id, title,
                    dtstart, dtend, eventTimezone, allDay)
  VALUES (2, 'alice@example.com', 'holiday', 1, 'Holiday',
          1268611200000, 1268697600000, 'UTC', 1);
INSERT INTO Events (_id, _sync_account, calendar_id, title,
                    dtstart, duration, eventTimezone, allDay, rrule)
  VALUES (3, 'alice@example.com', 1, 'Offsite',
          1268649000000, 'P3600S', 'UTC', 1, 'FREQ=WEEKLY');
INSERT INTO Events (_id, _sync_account, calendar_id, title, dtstart, dtend,
                    eventTimezone, allDay, originalEvent, originalInstanceTime)
  VALUES (4, 'alice@example.com', 1, 'Standup (moved)', 1268652600000, 1268654400000,
          'America/Los_Angeles', 0,
          'https://www.google.com/calendar/feeds/alice%40example.com/private/full-selfattendance/standup',
          1268649000000);

INSERT INTO Attendees (event_id, attendeeName, attendeeEmail, attendeeStatus, attendeeRelationship, attendeeType)
  VALUES (1, 'Alice', 'alice@example.com', 1, 2, 1);
INSERT INTO Attendees (event_id, attendeeName, attendeeEmail, attendeeStatus, attendeeRelationship, attendeeType)
  VALUES (1, 'Bob', 'bob@example.com', 0, 1, 1);

INSERT INTO Reminders (event_id, minutes, method) VALUES (1, 10, 1);

INSERT INTO Instances (event_id, begin, end, startDay, endDay, startMinute, endMinute)
  VALUES (1, 1268649000000, 1268650800000, 2455271, 2455271, 150, 180);

INSERT INTO CalendarMetaData (_id, localTimezone, minInstance, maxInstance)
  VALUES (1, 'America/Los_Angeles', 1268000000000, 1269000000000);

INSERT INTO _sync_state (_sync_account, _sync_account_type, data)
  VALUES ('alice@example.com', 'com.google', 'cursor-1');
";

pub const SEEDED_EVENTS: i64 = 4;
pub const SEEDED_CALENDARS: i64 = 2;
pub const SEEDED_ATTENDEES: i64 = 2;

/// Options every test uses, so results do not depend on the host zone.
pub fn options() -> MigrationOptions {
  MigrationOptions::with_local_timezone("Europe/Paris").unwrap()
}

pub fn v50() -> Connection {
  let conn = Connection::open_in_memory().unwrap();
  conn.execute_batch(SCHEMA_V50).unwrap();
  conn
}

pub fn seeded_v50() -> Connection {
  let conn = v50();
  conn.execute_batch(SEED_V50).unwrap();
  conn
}

/// An empty database in the shape of `version`.
pub fn at_version(version: u32) -> Connection { walk_to(v50(), version) }

/// The seeded data set, upgraded to `version`.
pub fn seeded_at_version(version: u32) -> Connection { walk_to(seeded_v50(), version) }

fn walk_to(mut conn: Connection, version: u32) -> Connection {
  match version {
    50 => {}
    // Nothing shipped at 68 differs from 67 in shape.
    68 => {
      conn = walk_to(conn, 67);
      schema::set_version(&conn, 68).unwrap();
    }
    // Release 70 already had stable cache row ids.
    70 => {
      conn = walk_to(conn, 69);
      cache::rekey(&conn).unwrap();
      schema::set_version(&conn, 70).unwrap();
    }
    _ => {
      let outcome = driver::upgrade(&mut conn, 50, version, &options()).unwrap();
      assert!(!outcome.was_lossy(), "building v{version}: {:?}", outcome.path);
    }
  }
  assert_eq!(schema::stored_version(&conn).unwrap(), version);
  conn
}

/// Every version the step chain can start from.
pub fn supported_versions() -> impl Iterator<Item = u32> { (50..=70).chain(100..=104) }

pub fn count(conn: &Connection, table: &str) -> i64 {
  conn
    .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
    .unwrap()
}
