//! The current calendar schema.
//!
//! Table and column names are exported as constants for the access layer.
//! The DDL below describes only the *current* shape; historical shapes live
//! inside the step bodies in [`crate::steps`].

use rusqlite::{Connection, OptionalExtension as _};

/// Version of the schema this engine creates and upgrades to.
pub const DATABASE_VERSION: u32 = 104;

/// Oldest stored version the step chain can walk from. Anything older is
/// rebuilt from scratch.
pub const OLDEST_SUPPORTED_VERSION: u32 = 50;

// ─── Names ───────────────────────────────────────────────────────────────────

pub mod tables {
  pub const CALENDARS: &str = "Calendars";
  pub const EVENTS: &str = "Events";
  pub const EVENTS_RAW_TIMES: &str = "EventsRawTimes";
  pub const INSTANCES: &str = "Instances";
  pub const ATTENDEES: &str = "Attendees";
  pub const REMINDERS: &str = "Reminders";
  pub const CALENDAR_ALERTS: &str = "CalendarAlerts";
  pub const EXTENDED_PROPERTIES: &str = "ExtendedProperties";
  pub const CALENDAR_META_DATA: &str = "CalendarMetaData";
  pub const CALENDAR_CACHE: &str = "CalendarCache";
  pub const SYNC_STATE: &str = "_sync_state";
  pub const SYNC_STATE_META: &str = "_sync_state_metadata";

  /// Tables from releases before 60. Only dropped, never created.
  pub const DELETED_EVENTS: &str = "DeletedEvents";
  pub const BUSY_BITS: &str = "BusyBits";
}

pub mod views {
  pub const EVENTS: &str = "view_events";
}

/// Columns shared by the synced tables.
pub mod sync_columns {
  pub const ACCOUNT: &str = "_sync_account";
  pub const ACCOUNT_TYPE: &str = "_sync_account_type";
  pub const ID: &str = "_sync_id";
  pub const VERSION: &str = "_sync_version";
  pub const TIME: &str = "_sync_time";
  pub const DATA: &str = "_sync_local_id";
  pub const DIRTY: &str = "_sync_dirty";
  pub const MARK: &str = "_sync_mark";
}

pub mod calendars {
  pub const ID: &str = "_id";
  pub const URL: &str = "url";
  pub const NAME: &str = "name";
  pub const DISPLAY_NAME: &str = "displayName";
  pub const HIDDEN: &str = "hidden";
  pub const COLOR: &str = "color";
  pub const ACCESS_LEVEL: &str = "access_level";
  pub const SELECTED: &str = "selected";
  pub const SYNC_EVENTS: &str = "sync_events";
  pub const LOCATION: &str = "location";
  pub const TIMEZONE: &str = "timezone";
  pub const OWNER_ACCOUNT: &str = "ownerAccount";
  pub const ORGANIZER_CAN_RESPOND: &str = "organizerCanRespond";
  pub const DELETED: &str = "deleted";
  pub const SELF_URL: &str = "selfUrl";
  pub const EDIT_URL: &str = "editUrl";
  pub const EVENTS_URL: &str = "eventsUrl";
}

pub mod events {
  pub const ID: &str = "_id";
  pub const CALENDAR_ID: &str = "calendar_id";
  pub const HTML_URI: &str = "htmlUri";
  pub const TITLE: &str = "title";
  pub const EVENT_LOCATION: &str = "eventLocation";
  pub const DESCRIPTION: &str = "description";
  pub const STATUS: &str = "eventStatus";
  pub const SELF_ATTENDEE_STATUS: &str = "selfAttendeeStatus";
  pub const COMMENTS_URI: &str = "commentsUri";
  pub const DTSTART: &str = "dtstart";
  pub const DTEND: &str = "dtend";
  pub const EVENT_TIMEZONE: &str = "eventTimezone";
  pub const DURATION: &str = "duration";
  pub const ALL_DAY: &str = "allDay";
  pub const VISIBILITY: &str = "visibility";
  pub const TRANSPARENCY: &str = "transparency";
  pub const HAS_ALARM: &str = "hasAlarm";
  pub const HAS_EXTENDED_PROPERTIES: &str = "hasExtendedProperties";
  pub const RRULE: &str = "rrule";
  pub const RDATE: &str = "rdate";
  pub const EXRULE: &str = "exrule";
  pub const EXDATE: &str = "exdate";
  pub const ORIGINAL_EVENT: &str = "originalEvent";
  pub const ORIGINAL_INSTANCE_TIME: &str = "originalInstanceTime";
  pub const ORIGINAL_ALL_DAY: &str = "originalAllDay";
  pub const LAST_DATE: &str = "lastDate";
  pub const HAS_ATTENDEE_DATA: &str = "hasAttendeeData";
  pub const GUESTS_CAN_MODIFY: &str = "guestsCanModify";
  pub const GUESTS_CAN_INVITE_OTHERS: &str = "guestsCanInviteOthers";
  pub const GUESTS_CAN_SEE_GUESTS: &str = "guestsCanSeeGuests";
  pub const ORGANIZER: &str = "organizer";
  pub const DELETED: &str = "deleted";
  /// All-day events expressed in the calendar's own timezone.
  pub const DTSTART2: &str = "dtstart2";
  pub const DTEND2: &str = "dtend2";
  pub const EVENT_TIMEZONE2: &str = "eventTimezone2";
  pub const SYNC_ADAPTER_DATA: &str = "syncAdapterData";
}

/// `event_id` and friends, shared by every table hanging off `Events`.
pub mod event_children {
  pub const ID: &str = "_id";
  pub const EVENT_ID: &str = "event_id";
}

pub mod attendees {
  pub const NAME: &str = "attendeeName";
  pub const EMAIL: &str = "attendeeEmail";
  pub const STATUS: &str = "attendeeStatus";
  pub const RELATIONSHIP: &str = "attendeeRelationship";
  pub const TYPE: &str = "attendeeType";

  /// `attendeeRelationship` value marking the organizer.
  pub const RELATIONSHIP_ORGANIZER: i64 = 2;
}

pub mod reminders {
  pub const MINUTES: &str = "minutes";
  pub const METHOD: &str = "method";
}

pub mod instances {
  pub const BEGIN: &str = "begin";
  pub const END: &str = "end";
  pub const START_DAY: &str = "startDay";
  pub const END_DAY: &str = "endDay";
  pub const START_MINUTE: &str = "startMinute";
  pub const END_MINUTE: &str = "endMinute";
}

pub mod meta_data {
  pub const LOCAL_TIMEZONE: &str = "localTimezone";
  pub const MIN_INSTANCE: &str = "minInstance";
  pub const MAX_INSTANCE: &str = "maxInstance";
}

/// Tables dropped by a rebuild, in drop order.
pub const OWNED_TABLES: &[&str] = &[
  tables::CALENDARS,
  tables::EVENTS,
  tables::EVENTS_RAW_TIMES,
  tables::INSTANCES,
  tables::CALENDAR_META_DATA,
  tables::CALENDAR_CACHE,
  tables::ATTENDEES,
  tables::REMINDERS,
  tables::CALENDAR_ALERTS,
  tables::EXTENDED_PROPERTIES,
  tables::DELETED_EVENTS,
  tables::BUSY_BITS,
  tables::SYNC_STATE,
  tables::SYNC_STATE_META,
];

/// Application tables holding user data.
pub const DATA_TABLES: &[&str] = &[
  tables::CALENDARS,
  tables::EVENTS,
  tables::EVENTS_RAW_TIMES,
  tables::INSTANCES,
  tables::ATTENDEES,
  tables::REMINDERS,
  tables::CALENDAR_ALERTS,
  tables::EXTENDED_PROPERTIES,
  tables::CALENDAR_META_DATA,
];

// ─── Tables ──────────────────────────────────────────────────────────────────

pub const CREATE_CALENDARS: &str = "
CREATE TABLE Calendars (
    _id                 INTEGER PRIMARY KEY,
    _sync_account       TEXT,
    _sync_account_type  TEXT,
    _sync_id            TEXT,
    _sync_version       TEXT,
    _sync_time          TEXT,     -- UTC
    _sync_local_id      INTEGER,
    _sync_dirty         INTEGER,
    _sync_mark          INTEGER,  -- filters out new rows
    url                 TEXT,
    name                TEXT,
    displayName         TEXT,
    hidden              INTEGER NOT NULL DEFAULT 0,
    color               INTEGER,
    access_level        INTEGER,
    selected            INTEGER NOT NULL DEFAULT 1,
    sync_events         INTEGER NOT NULL DEFAULT 0,
    location            TEXT,
    timezone            TEXT,
    ownerAccount        TEXT,
    organizerCanRespond INTEGER NOT NULL DEFAULT 1,
    deleted             INTEGER NOT NULL DEFAULT 0,
    selfUrl             TEXT,
    editUrl             TEXT,
    eventsUrl           TEXT
);

CREATE INDEX calendarsUrlIndex ON Calendars (url);
";

/// `Events` without its indexes, so the table rebuild at 101 can reuse it.
pub const CREATE_EVENTS_TABLE: &str = "
CREATE TABLE Events (
    _id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    _sync_account         TEXT,
    _sync_account_type    TEXT,
    _sync_id              TEXT,
    _sync_version         TEXT,
    _sync_time            TEXT,     -- UTC
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
    dtstart               INTEGER,  -- millis since epoch
    dtend                 INTEGER,  -- millis since epoch
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
    originalEvent         TEXT,     -- _sync_id of the recurring event
    originalInstanceTime  INTEGER,  -- millis since epoch
    originalAllDay        INTEGER,
    lastDate              INTEGER,  -- millis since epoch
    hasAttendeeData       INTEGER NOT NULL DEFAULT 0,
    guestsCanModify       INTEGER NOT NULL DEFAULT 0,
    guestsCanInviteOthers INTEGER NOT NULL DEFAULT 1,
    guestsCanSeeGuests    INTEGER NOT NULL DEFAULT 1,
    organizer             STRING,
    deleted               INTEGER NOT NULL DEFAULT 0,
    dtstart2              INTEGER,  -- all-day events in the calendar's timezone
    dtend2                INTEGER,
    eventTimezone2        TEXT,
    syncAdapterData       TEXT      -- reserved for sync adapters
);
";

pub const CREATE_EVENTS_INDEXES: &str = "
CREATE INDEX eventSyncAccountAndIdIndex ON Events (_sync_account_type, _sync_account, _sync_id);
CREATE INDEX eventsCalendarIdIndex ON Events (calendar_id);
";

pub const CREATE_EVENTS_RAW_TIMES: &str = "
CREATE TABLE EventsRawTimes (
    _id                      INTEGER PRIMARY KEY,
    event_id                 INTEGER NOT NULL,
    dtstart2445              TEXT,
    dtend2445                TEXT,
    originalInstanceTime2445 TEXT,
    lastDate2445             TEXT,
    UNIQUE (event_id)
);
";

pub const CREATE_INSTANCES: &str = "
CREATE TABLE Instances (
    _id         INTEGER PRIMARY KEY,
    event_id    INTEGER,
    begin       INTEGER,  -- UTC millis
    end         INTEGER,  -- UTC millis
    startDay    INTEGER,  -- Julian day
    endDay      INTEGER,  -- Julian day
    startMinute INTEGER,  -- minutes from midnight
    endMinute   INTEGER,
    UNIQUE (event_id, begin, end)
);

CREATE INDEX instancesStartDayIndex ON Instances (startDay);
";

pub const CREATE_CALENDAR_META_DATA: &str = "
CREATE TABLE CalendarMetaData (
    _id           INTEGER PRIMARY KEY,
    localTimezone TEXT,
    minInstance   INTEGER,  -- UTC millis
    maxInstance   INTEGER   -- UTC millis
);
";

pub const CREATE_ATTENDEES: &str = "
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
";

pub const CREATE_REMINDERS: &str = "
CREATE TABLE Reminders (
    _id      INTEGER PRIMARY KEY,
    event_id INTEGER,
    minutes  INTEGER,
    method   INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX remindersEventIdIndex ON Reminders (event_id);
";

/// Alerts that have already fired.
pub const CREATE_CALENDAR_ALERTS: &str = "
CREATE TABLE CalendarAlerts (
    _id          INTEGER PRIMARY KEY,
    event_id     INTEGER,
    begin        INTEGER NOT NULL,  -- UTC millis
    end          INTEGER NOT NULL,
    alarmTime    INTEGER NOT NULL,
    creationTime INTEGER NOT NULL,
    receivedTime INTEGER NOT NULL,
    notifyTime   INTEGER NOT NULL,
    state        INTEGER NOT NULL,
    minutes      INTEGER,
    UNIQUE (alarmTime, begin, event_id)
);

CREATE INDEX calendarAlertsEventIdIndex ON CalendarAlerts (event_id);
";

pub const CREATE_EXTENDED_PROPERTIES: &str = "
CREATE TABLE ExtendedProperties (
    _id      INTEGER PRIMARY KEY,
    event_id INTEGER,
    name     TEXT,
    value    TEXT
);

CREATE INDEX extendedPropertiesEventIdIndex ON ExtendedProperties (event_id);
";

// ─── Triggers ────────────────────────────────────────────────────────────────

/// Deleting a calendar deletes its events (and, through
/// [`EVENTS_CLEANUP_TRIGGER`], everything hanging off them).
pub const CALENDAR_CLEANUP_TRIGGER: &str = "
CREATE TRIGGER calendar_cleanup DELETE ON Calendars
BEGIN
    DELETE FROM Events WHERE calendar_id = old._id;
END;
";

/// New events inherit their calendar's sync account.
pub const EVENTS_INSERT_TRIGGER: &str = "
CREATE TRIGGER events_insert AFTER INSERT ON Events
BEGIN
    UPDATE Events
       SET _sync_account      = (SELECT _sync_account FROM Calendars WHERE Calendars._id = new.calendar_id),
           _sync_account_type = (SELECT _sync_account_type FROM Calendars WHERE Calendars._id = new.calendar_id)
     WHERE Events._id = new._id;
END;
";

pub const EVENTS_CLEANUP_TRIGGER: &str = "
CREATE TRIGGER events_cleanup_delete DELETE ON Events
BEGIN
    DELETE FROM Instances WHERE event_id = old._id;
    DELETE FROM EventsRawTimes WHERE event_id = old._id;
    DELETE FROM Attendees WHERE event_id = old._id;
    DELETE FROM Reminders WHERE event_id = old._id;
    DELETE FROM CalendarAlerts WHERE event_id = old._id;
    DELETE FROM ExtendedProperties WHERE event_id = old._id;
END;
";

// ─── Events view ─────────────────────────────────────────────────────────────

/// Which columns the events view exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewShape {
  /// Releases 60 through 102, before `Calendars.eventsUrl` existed.
  Legacy,
  Current,
}

/// `_id`, `deleted` and the sync columns exist on both tables and are
/// qualified to the event side.
const EVENTS_VIEW_COLUMNS: &str = "
    Events._id AS _id,
    htmlUri,
    title,
    description,
    eventLocation,
    eventStatus,
    selfAttendeeStatus,
    commentsUri,
    dtstart,
    dtend,
    duration,
    eventTimezone,
    allDay,
    visibility,
    timezone,
    selected,
    access_level,
    transparency,
    color,
    hasAlarm,
    hasExtendedProperties,
    rrule,
    rdate,
    exrule,
    exdate,
    originalEvent,
    originalInstanceTime,
    originalAllDay,
    lastDate,
    hasAttendeeData,
    calendar_id,
    guestsCanInviteOthers,
    guestsCanModify,
    guestsCanSeeGuests,
    organizer,
    Events.deleted AS deleted,
    Events._sync_id AS _sync_id,
    Events._sync_version AS _sync_version,
    Events._sync_dirty AS _sync_dirty,
    Events._sync_account AS _sync_account,
    Events._sync_account_type AS _sync_account_type,
    Events._sync_time AS _sync_time,
    Events._sync_local_id AS _sync_local_id,
    Events._sync_mark AS _sync_mark,
    ownerAccount,
    sync_events";

pub fn events_view_sql(shape: ViewShape) -> String {
  let extra = match shape {
    ViewShape::Legacy => "",
    ViewShape::Current => ",\n    eventsUrl",
  };
  format!(
    "CREATE VIEW view_events AS SELECT{EVENTS_VIEW_COLUMNS}{extra}
     FROM Events JOIN Calendars ON (Events.calendar_id = Calendars._id)"
  )
}

/// Drop and recreate the events view.
pub fn create_events_view(conn: &Connection, shape: ViewShape) -> rusqlite::Result<()> {
  conn.execute_batch("DROP VIEW IF EXISTS view_events;")?;
  conn.execute_batch(&events_view_sql(shape))
}

// ─── Introspection ───────────────────────────────────────────────────────────

pub fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        rusqlite::params![name],
        |_| Ok(()),
      )
      .optional()?
      .is_some(),
  )
}

/// Names of every table in the main schema, sorted, excluding SQLite's own.
pub fn table_names(conn: &Connection) -> rusqlite::Result<Vec<String>> {
  let mut stmt = conn.prepare(
    "SELECT name FROM sqlite_master
      WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
      ORDER BY name",
  )?;
  let names = stmt
    .query_map([], |row| row.get(0))?
    .collect::<rusqlite::Result<Vec<String>>>()?;
  Ok(names)
}

pub fn column_names(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
  let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
  let names = stmt
    .query_map(rusqlite::params![table], |row| row.get(0))?
    .collect::<rusqlite::Result<Vec<String>>>()?;
  Ok(names)
}

// ─── Version ─────────────────────────────────────────────────────────────────

/// The version stamp as SQLite stores it, which may be negative.
pub fn raw_version(conn: &Connection) -> rusqlite::Result<i32> {
  conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

pub fn stored_version(conn: &Connection) -> rusqlite::Result<u32> {
  conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

pub fn set_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
  conn.pragma_update(None, "user_version", version)
}
