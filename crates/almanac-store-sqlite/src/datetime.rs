//! Instants, civil dates, and day-granular durations.
//!
//! Stored times are milliseconds since the epoch. All-day values are only
//! meaningful as midnights, either in UTC or in a named zone.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, TimeZone as _, Utc};
use chrono_tz::Tz;

pub const DAY_SECONDS: i64 = 86_400;
pub const DAY_MILLIS: i64 = DAY_SECONDS * 1000;

/// Resolve an IANA zone name. `UTC` is accepted.
pub fn parse_zone(name: &str) -> Option<Tz> { name.parse::<Tz>().ok() }

/// Civil date of `millis` as seen in `zone`.
pub fn civil_date(millis: i64, zone: Tz) -> Option<NaiveDate> {
  let instant = DateTime::<Utc>::from_timestamp_millis(millis)?;
  Some(instant.with_timezone(&zone).date_naive())
}

/// First instant of `date` in `zone`.
///
/// When midnight falls into a daylight-saving gap the day starts an hour
/// later.
pub fn start_of_day(date: NaiveDate, zone: Tz) -> Option<i64> {
  let midnight: NaiveDateTime = date.and_hms_opt(0, 0, 0)?;
  let local = zone
    .from_local_datetime(&midnight)
    .earliest()
    .or_else(|| zone.from_local_datetime(&(midnight + TimeDelta::hours(1))).earliest())?;
  Some(local.timestamp_millis())
}

/// `millis` truncated to midnight of its own day in `zone`.
pub fn align_to_midnight(millis: i64, zone: Tz) -> Option<i64> {
  start_of_day(civil_date(millis, zone)?, zone)
}

/// Midnight in `to` of the calendar date `millis` falls on in `from`.
pub fn same_date_in(millis: i64, from: Tz, to: Tz) -> Option<i64> {
  start_of_day(civil_date(millis, from)?, to)
}

// ─── Durations ───────────────────────────────────────────────────────────────

/// Parse an RFC 2445 style duration (`P1W`, `P2D`, `PT1H30M`, `P3600S`) into
/// seconds.
///
/// Units must appear in the order `W D H M S`, each at most once. A `T`
/// separator is accepted anywhere between units. Signs are rejected.
pub fn duration_seconds(text: &str) -> Option<i64> {
  let body = text.strip_prefix('P')?;

  let mut total: i64 = 0;
  let mut value: Option<i64> = None;
  let mut last_rank = 0;
  let mut seen_separator = false;

  for c in body.chars() {
    if let Some(digit) = c.to_digit(10) {
      let acc = value.unwrap_or(0);
      value = Some(acc.checked_mul(10)?.checked_add(i64::from(digit))?);
      continue;
    }

    if c == 'T' {
      if seen_separator || value.is_some() {
        return None;
      }
      seen_separator = true;
      continue;
    }

    let (rank, unit) = match c {
      'W' => (1, 7 * DAY_SECONDS),
      'D' => (2, DAY_SECONDS),
      'H' => (3, 3600),
      'M' => (4, 60),
      'S' => (5, 1),
      _ => return None,
    };
    if rank <= last_rank {
      return None;
    }
    last_rank = rank;
    total = total.checked_add(value.take()?.checked_mul(unit)?)?;
  }

  // Trailing digits without a unit, or no units at all.
  if value.is_some() || last_rank == 0 {
    return None;
  }
  Some(total)
}

/// Day count of a duration already written as `P<n>D`.
pub fn whole_days(text: &str) -> Option<i64> {
  let digits = text.strip_prefix('P')?.strip_suffix('D')?;
  if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  digits.parse().ok()
}

/// Whole days covering `seconds`, rounding any remainder up.
pub fn days_covering(seconds: i64) -> i64 {
  seconds.div_euclid(DAY_SECONDS) + i64::from(seconds.rem_euclid(DAY_SECONDS) != 0)
}

pub fn day_duration(days: i64) -> String { format!("P{days}D") }
