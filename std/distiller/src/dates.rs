//! Parsing of the loose date expressions tools accept.

use crate::error::Error;
use chrono::{Duration, Local, NaiveDate, NaiveDateTime};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%m/%d/%Y %H:%M:%S"];

/// Parse a relative phrase or a calendar date, relative to the local clock.
pub fn parse_date(input: &str) -> Result<NaiveDateTime, Error> {
    ensure_datetime(input, Local::now().naive_local())
}

/// Parse `input` relative to `now`.
///
/// Accepts `today`, `yesterday`, `last_week` (7 days), `last_month`
/// (30 days) and `last_year` (365 days), or a date in one of the formats
/// `YYYY-MM-DD`, `MM/DD/YYYY`, `DD/MM/YYYY`, `YYYY-MM-DD HH:MM:SS`,
/// `MM/DD/YYYY HH:MM:SS`. Slash dates are read month-first when both
/// readings are valid.
pub fn ensure_datetime(input: &str, now: NaiveDateTime) -> Result<NaiveDateTime, Error> {
    let input = input.trim();
    let days_back = match input.to_ascii_lowercase().as_str() {
        "today" => Some(0),
        "yesterday" => Some(1),
        "last_week" => Some(7),
        "last_month" => Some(30),
        "last_year" => Some(365),
        _ => None,
    };
    if let Some(days) = days_back {
        return Ok(now - Duration::days(days));
    }

    tracing::debug!("parsing date: {input}");
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(input, fmt) {
            return Ok(date.and_time(chrono::NaiveTime::MIN));
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(input, fmt) {
            return Ok(dt);
        }
    }
    Err(Error::DateParse(input.to_string()))
}
