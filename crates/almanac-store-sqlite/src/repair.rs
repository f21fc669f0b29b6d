//! Row-level fixes for data that earlier releases stored incorrectly.
//!
//! Every routine reads what it needs into memory first, finalizes the read
//! statement, and only then issues updates, and only for rows whose values
//! actually change.

use std::borrow::Cow;

use chrono_tz::Tz;
use rusqlite::{Connection, OptionalExtension as _, params};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  Result,
  datetime::{
    DAY_MILLIS, align_to_midnight, day_duration, days_covering, duration_seconds,
    parse_zone, same_date_in, whole_days,
  },
};

const UTC: &str = "UTC";

// ─── Recurrence exceptions ───────────────────────────────────────────────────

/// Fill `originalAllDay` on recurrence exceptions from the recurring event
/// they belong to.
///
/// The parent is located by `_sync_id`. Exceptions whose parent is gone, or
/// was never synced, are left NULL.
pub fn backfill_original_all_day(conn: &Connection) -> Result<usize> {
  let exceptions: Vec<(i64, String)> = {
    let mut stmt =
      conn.prepare("SELECT _id, originalEvent FROM Events WHERE originalEvent IS NOT NULL")?;
    stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
      .collect::<rusqlite::Result<_>>()?
  };

  let mut fills = Vec::with_capacity(exceptions.len());
  {
    let mut parent = conn.prepare("SELECT allDay FROM Events WHERE _sync_id = ?1 LIMIT 1")?;
    for (id, original) in exceptions {
      match parent
        .query_row(params![original], |row| row.get::<_, i64>(0))
        .optional()?
      {
        Some(all_day) => fills.push((id, all_day)),
        None => debug!(event = id, %original, "recurring parent not found"),
      }
    }
  }

  let mut update = conn.prepare("UPDATE Events SET originalAllDay = ?1 WHERE _id = ?2")?;
  for (id, all_day) in &fills {
    update.execute(params![all_day, id])?;
  }
  Ok(fills.len())
}

// ─── Calendar owners ─────────────────────────────────────────────────────────

/// Extract the owner address from a calendar feed URL.
///
/// The owner is the path segment following `feeds`, percent-decoded:
/// `https://host/feeds/foo%40bar.com/private/full` → `foo@bar.com`.
pub fn owner_from_feed_url(url: &str) -> Option<String> {
  let segments: Vec<&str> = url.split('/').collect();
  // Skip the scheme, the empty segment after it, and the host.
  let feeds = segments
    .iter()
    .enumerate()
    .skip(3)
    .find_map(|(i, segment)| (*segment == "feeds").then_some(i))?;
  let raw = segments.get(feeds + 1).filter(|s| !s.is_empty())?;
  // Path decoding: `+` stays a plus sign.
  urlencoding::decode(raw).ok().map(Cow::into_owned)
}

/// Set `ownerAccount` on every calendar whose feed URL names an owner.
pub fn backfill_calendar_owners(conn: &Connection) -> Result<usize> {
  let calendars: Vec<(i64, Option<String>)> = {
    let mut stmt = conn.prepare("SELECT _id, url FROM Calendars")?;
    stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
      .collect::<rusqlite::Result<_>>()?
  };

  let owners: Vec<(i64, String)> = calendars
    .into_iter()
    .filter_map(|(id, url)| {
      let url = url?;
      let owner = owner_from_feed_url(&url);
      if owner.is_none() {
        warn!(calendar = id, %url, "no owner address in calendar feed url");
      }
      Some((id, owner?))
    })
    .collect();

  let mut update = conn.prepare("UPDATE Calendars SET ownerAccount = ?1 WHERE _id = ?2")?;
  for (id, owner) in &owners {
    update.execute(params![owner, id])?;
  }
  Ok(owners.len())
}

// ─── Local all-day times ─────────────────────────────────────────────────────

/// Re-express every all-day event as midnight of the same date in its
/// calendar's zone, writing the result to the `*2` columns.
pub fn localize_all_day_times(conn: &Connection) -> Result<usize> {
  type Row = (i64, Option<i64>, Option<i64>, Option<String>, Option<String>);

  let rows: Vec<Row> = {
    let mut stmt = conn.prepare(
      "SELECT Events._id, dtstart, dtend, eventTimezone, Calendars.timezone
         FROM Events JOIN Calendars ON Events.calendar_id = Calendars._id
        WHERE allDay = 1",
    )?;
    stmt
      .query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })?
      .collect::<rusqlite::Result<_>>()?
  };

  let mut updates = Vec::with_capacity(rows.len());
  for (id, dtstart, dtend, event_zone, calendar_zone) in rows {
    let Some(dtstart) = dtstart else {
      debug!(event = id, "all-day event without a start");
      continue;
    };
    let event_zone = event_zone.unwrap_or_else(|| UTC.to_owned());
    let Some(from) = parse_zone(&event_zone) else {
      warn!(event = id, zone = %event_zone, "unknown event timezone");
      continue;
    };
    let Some((to, calendar_zone)) = calendar_zone
      .as_deref()
      .and_then(|name| Some((parse_zone(name)?, name.to_owned())))
    else {
      warn!(event = id, zone = ?calendar_zone, "unknown calendar timezone");
      continue;
    };

    let Some(start2) = same_date_in(dtstart, from, to) else {
      warn!(event = id, dtstart, "start time out of range");
      continue;
    };
    let end2 = dtend.and_then(|end| same_date_in(end, from, to));
    updates.push((id, start2, end2, calendar_zone));
  }

  let mut update = conn.prepare(
    "UPDATE Events SET dtstart2 = ?1, dtend2 = ?2, eventTimezone2 = ?3 WHERE _id = ?4",
  )?;
  for (id, start2, end2, zone) in &updates {
    update.execute(params![start2, end2, zone, id])?;
  }
  Ok(updates.len())
}

// ─── All-day repair ──────────────────────────────────────────────────────────

/// The columns of an all-day event the repair looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllDayRow {
  pub id:              i64,
  pub dtstart:         Option<i64>,
  pub dtend:           Option<i64>,
  pub duration:        Option<String>,
  pub dtstart2:        Option<i64>,
  pub dtend2:          Option<i64>,
  pub event_timezone:  Option<String>,
  pub event_timezone2: Option<String>,
  pub rrule:           Option<String>,
}

/// Corrected values for one row. `eventTimezone` is always `UTC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllDayFix {
  pub id:       i64,
  pub dtstart:  i64,
  pub dtend:    Option<i64>,
  pub dtstart2: Option<i64>,
  pub dtend2:   Option<i64>,
  pub duration: Option<String>,
}

/// Why a row could not be repaired.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowDefect {
  #[error("all-day event has no start time")]
  MissingStart,

  #[error("unknown timezone {0:?}")]
  UnknownZone(String),

  #[error("unparseable duration {0:?}")]
  BadDuration(String),

  #[error("time {0} is out of range")]
  OutOfRange(i64),
}

fn non_empty(value: &Option<String>) -> Option<&str> {
  value.as_deref().filter(|s| !s.is_empty())
}

fn align(millis: i64, zone: Tz) -> Result<i64, RowDefect> {
  align_to_midnight(millis, zone).ok_or(RowDefect::OutOfRange(millis))
}

/// Days covered by `text`, at least one. Durations too long to add to a
/// timestamp are rejected.
fn duration_days(text: &str) -> Result<i64, RowDefect> {
  duration_seconds(text)
    .map(|secs| days_covering(secs).max(1))
    .filter(|days| days.checked_mul(DAY_MILLIS).is_some())
    .ok_or_else(|| RowDefect::BadDuration(text.to_owned()))
}

/// Work out what an all-day row should look like.
///
/// Returns `Ok(None)` when the row is already correct.
pub fn fix_all_day(row: &AllDayRow) -> Result<Option<AllDayFix>, RowDefect> {
  let start = row.dtstart.ok_or(RowDefect::MissingStart)?;
  let zone2 = non_empty(&row.event_timezone2)
    .map(|name| parse_zone(name).ok_or_else(|| RowDefect::UnknownZone(name.to_owned())))
    .transpose()?;

  let mut changed = row.event_timezone.as_deref() != Some(UTC);

  let dtstart = align(start, Tz::UTC)?;
  changed |= dtstart != start;

  let dtstart2 = match zone2 {
    Some(zone) => row.dtstart2.map(|t| align(t, zone)).transpose()?,
    None => None,
  };
  changed |= dtstart2 != row.dtstart2;

  let fix = if non_empty(&row.rrule).is_none() {
    let dtend = match row.dtend {
      Some(end) => align(end, Tz::UTC)?,
      None => {
        let days = non_empty(&row.duration).map(duration_days).transpose()?.unwrap_or(1);
        dtstart
          .checked_add(days * DAY_MILLIS)
          .ok_or(RowDefect::OutOfRange(start))?
      }
    };
    changed |= Some(dtend) != row.dtend;

    let dtend2 = match zone2 {
      Some(zone) => row.dtend2.map(|t| align(t, zone)).transpose()?,
      None => None,
    };
    changed |= dtend2 != row.dtend2;
    changed |= row.duration.is_some();

    AllDayFix { id: row.id, dtstart, dtend: Some(dtend), dtstart2, dtend2, duration: None }
  } else {
    changed |= row.dtend.is_some() || row.dtend2.is_some();

    let duration = match non_empty(&row.duration) {
      None => {
        changed = true;
        day_duration(1)
      }
      Some(text) if whole_days(text).is_some_and(|days| days > 0) => text.to_owned(),
      Some(text) => {
        changed = true;
        day_duration(duration_days(text)?)
      }
    };

    AllDayFix {
      id: row.id,
      dtstart,
      dtend: None,
      dtstart2,
      dtend2: None,
      duration: Some(duration),
    }
  };

  Ok(changed.then_some(fix))
}

/// Bring every all-day event into canonical form.
///
/// Rows that cannot be interpreted are logged and left as they are. Returns
/// the number of rows updated.
pub fn repair_all_day_events(conn: &Connection) -> Result<usize> {
  let rows: Vec<AllDayRow> = {
    let mut stmt = conn.prepare(
      "SELECT _id, dtstart, dtend, duration, dtstart2, dtend2,
              eventTimezone, eventTimezone2, rrule
         FROM Events
        WHERE allDay = 1",
    )?;
    stmt
      .query_map([], |row| {
        Ok(AllDayRow {
          id:              row.get(0)?,
          dtstart:         row.get(1)?,
          dtend:           row.get(2)?,
          duration:        row.get(3)?,
          dtstart2:        row.get(4)?,
          dtend2:          row.get(5)?,
          event_timezone:  row.get(6)?,
          event_timezone2: row.get(7)?,
          rrule:           row.get(8)?,
        })
      })?
      .collect::<rusqlite::Result<_>>()?
  };

  let fixes: Vec<AllDayFix> = rows
    .iter()
    .filter_map(|row| match fix_all_day(row) {
      Ok(fix) => fix,
      Err(defect) => {
        warn!(event = row.id, %defect, "skipping all-day event");
        None
      }
    })
    .collect();

  let mut update = conn.prepare(
    "UPDATE Events
        SET dtstart = ?1, dtend = ?2, dtstart2 = ?3, dtend2 = ?4,
            duration = ?5, eventTimezone = ?6
      WHERE _id = ?7",
  )?;
  for fix in &fixes {
    update.execute(params![
      fix.dtstart,
      fix.dtend,
      fix.dtstart2,
      fix.dtend2,
      fix.duration,
      UTC,
      fix.id,
    ])?;
  }

  debug!(scanned = rows.len(), updated = fixes.len(), "all-day repair");
  Ok(fixes.len())
}

#[cfg(test)]
mod tests {
  use super::*;

  // 2010-03-15 00:00 UTC and friends.
  const MIDNIGHT: i64 = 1268611200000;
  const MORNING: i64 = 1268649000000;
  const NEXT_DAY: i64 = 1268697600000;
  const PARIS_MIDNIGHT: i64 = 1268607600000;
  const PARIS_MORNING: i64 = 1268625600000;

  fn clean_single() -> AllDayRow {
    AllDayRow {
      id: 1,
      dtstart: Some(MIDNIGHT),
      dtend: Some(NEXT_DAY),
      event_timezone: Some(UTC.into()),
      ..Default::default()
    }
  }

  #[test]
  fn clean_rows_are_left_alone() {
    assert_eq!(fix_all_day(&clean_single()), Ok(None));

    let recurring = AllDayRow {
      dtend: None,
      duration: Some("P1D".into()),
      rrule: Some("FREQ=WEEKLY".into()),
      ..clean_single()
    };
    assert_eq!(fix_all_day(&recurring), Ok(None));
  }

  #[test]
  fn single_event_is_aligned_and_loses_duration() {
    let row = AllDayRow {
      dtstart: Some(MORNING),
      duration: Some("P1D".into()),
      event_timezone: Some("America/Los_Angeles".into()),
      ..clean_single()
    };

    let fix = fix_all_day(&row).unwrap().unwrap();
    assert_eq!(fix.dtstart, MIDNIGHT);
    assert_eq!(fix.dtend, Some(NEXT_DAY));
    assert_eq!(fix.duration, None);
  }

  #[test]
  fn millisecond_offsets_count() {
    let row = AllDayRow { dtstart: Some(MIDNIGHT + 1), ..clean_single() };
    assert_eq!(fix_all_day(&row).unwrap().unwrap().dtstart, MIDNIGHT);
  }

  #[test]
  fn missing_end_comes_from_duration() {
    let row = AllDayRow { dtend: None, duration: Some("P2D".into()), ..clean_single() };
    let fix = fix_all_day(&row).unwrap().unwrap();
    assert_eq!(fix.dtend, Some(MIDNIGHT + 2 * DAY_MILLIS));

    let row = AllDayRow { dtend: None, ..clean_single() };
    let fix = fix_all_day(&row).unwrap().unwrap();
    assert_eq!(fix.dtend, Some(NEXT_DAY));
  }

  #[test]
  fn recurring_durations_become_days() {
    for (duration, expected) in [
      (Some("P3600S"), "P1D"),
      (Some("PT2H"), "P1D"),
      (Some("P1W"), "P7D"),
      (Some("P90000S"), "P2D"),
      (None, "P1D"),
      (Some(""), "P1D"),
      (Some("P0D"), "P1D"),
      (Some("PT0S"), "P1D"),
      (Some("P4D"), "P4D"),
    ] {
      let row = AllDayRow {
        dtend: None,
        duration: duration.map(Into::into),
        rrule: Some("FREQ=DAILY".into()),
        ..clean_single()
      };
      let fix = fix_all_day(&row).unwrap().unwrap();
      assert_eq!(fix.duration.as_deref(), Some(expected), "{duration:?}");
      assert_eq!(fix.dtend, None);
    }
  }

  #[test]
  fn recurring_end_is_dropped() {
    let row = AllDayRow {
      duration: Some("P1D".into()),
      rrule: Some("FREQ=DAILY".into()),
      ..clean_single()
    };
    let fix = fix_all_day(&row).unwrap().unwrap();
    assert_eq!(fix.dtend, None);
    assert_eq!(fix.dtend2, None);
  }

  #[test]
  fn local_columns_align_in_their_zone() {
    let row = AllDayRow {
      dtstart2: Some(PARIS_MORNING),
      dtend2: Some(PARIS_MIDNIGHT + DAY_MILLIS),
      event_timezone2: Some("Europe/Paris".into()),
      ..clean_single()
    };
    let fix = fix_all_day(&row).unwrap().unwrap();
    assert_eq!(fix.dtstart2, Some(PARIS_MIDNIGHT));
    assert_eq!(fix.dtend2, Some(PARIS_MIDNIGHT + DAY_MILLIS));
  }

  #[test]
  fn local_columns_without_zone_are_cleared() {
    let row = AllDayRow { dtstart2: Some(MIDNIGHT), ..clean_single() };
    let fix = fix_all_day(&row).unwrap().unwrap();
    assert_eq!(fix.dtstart2, None);
  }

  #[test]
  fn defects_are_reported() {
    let row = AllDayRow { dtstart: None, ..clean_single() };
    assert_eq!(fix_all_day(&row), Err(RowDefect::MissingStart));

    let row = AllDayRow { event_timezone2: Some("Nowhere/Special".into()), ..clean_single() };
    assert_eq!(fix_all_day(&row), Err(RowDefect::UnknownZone("Nowhere/Special".into())));

    let row = AllDayRow {
      duration: Some("P-1D".into()),
      rrule: Some("FREQ=DAILY".into()),
      dtend: None,
      ..clean_single()
    };
    assert_eq!(fix_all_day(&row), Err(RowDefect::BadDuration("P-1D".into())));
  }

  #[test]
  fn oversized_durations_are_defects() {
    let row = AllDayRow {
      dtend: None,
      duration: Some("P999999999999D".into()),
      ..clean_single()
    };
    assert_eq!(fix_all_day(&row), Err(RowDefect::BadDuration("P999999999999D".into())));

    let row = AllDayRow {
      dtend: None,
      duration: Some("P9223372036854775807S".into()),
      rrule: Some("FREQ=DAILY".into()),
      ..clean_single()
    };
    assert_eq!(
      fix_all_day(&row),
      Err(RowDefect::BadDuration("P9223372036854775807S".into()))
    );

    // Fits in a day count but not once added to the start.
    let days = i64::MAX / DAY_MILLIS;
    let text = format!("P{days}D");
    let row = AllDayRow { dtend: None, duration: Some(text), ..clean_single() };
    assert_eq!(fix_all_day(&row), Err(RowDefect::OutOfRange(MIDNIGHT)));
  }

  #[test]
  fn feed_url_owners() {
    assert_eq!(
      owner_from_feed_url("https://host/feeds/foo%40bar.com/private/full").as_deref(),
      Some("foo@bar.com")
    );
    assert_eq!(
      owner_from_feed_url(
        "https://www.google.com/calendar/feeds/alice%40example.com/private/full"
      )
      .as_deref(),
      Some("alice@example.com")
    );
    assert_eq!(
      owner_from_feed_url("https://host/feeds/a+b%40c.com/private/full").as_deref(),
      Some("a+b@c.com")
    );
    assert_eq!(owner_from_feed_url("https://host/calendar/private/full"), None);
    assert_eq!(owner_from_feed_url("https://host/feeds/"), None);
    assert_eq!(owner_from_feed_url("feeds/foo"), None);
    assert_eq!(owner_from_feed_url(""), None);
  }
}
