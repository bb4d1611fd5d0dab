// libs/schedule-cell/src/services/agenda.rs
//
// Pure helpers mapping wall-clock instants onto the agenda grid and back.
// Day-boundary arithmetic lives here so the scheduling services never
// disagree about what "the same day" means.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

use shared_utils::clock::Clock;

/// Vertical scale of the agenda grid.
pub const PIXELS_PER_MINUTE: f32 = 1.5;

/// Vertical offset, in pixels, of an instant relative to the grid's first
/// hour. Instants outside the grid bounds produce negative or oversized
/// offsets; clipping is the caller's concern.
pub fn instant_to_offset(instant: DateTime<Utc>, grid_start_hour: u32) -> f32 {
    let minutes_into_day = (instant.hour() * 60 + instant.minute()) as i64;
    let grid_start_minutes = (grid_start_hour * 60) as i64;
    (minutes_into_day - grid_start_minutes) as f32 * PIXELS_PER_MINUTE
}

/// Height, in pixels, of a block spanning `minutes`.
pub fn duration_to_extent(minutes: i32) -> f32 {
    minutes as f32 * PIXELS_PER_MINUTE
}

/// Calendar-day key (`YYYY-MM-DD`) for an instant.
pub fn date_key(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d").to_string()
}

/// Parse a calendar-day key back into a date.
///
/// Missing or unparseable input falls back to today. This leniency is a
/// navigation convenience (a garbled URL lands on the current day) and is
/// confined to agenda navigation; financial date parsing rejects instead.
pub fn parse_date_key(value: Option<&str>, clock: &dyn Clock) -> NaiveDate {
    value
        .and_then(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").ok())
        .unwrap_or_else(|| clock.today())
}

/// Compare year/month/day components, not absolute instants.
pub fn is_same_calendar_day(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year() && a.month() == b.month() && a.day() == b.day()
}
