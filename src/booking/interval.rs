use chrono::{NaiveDate, NaiveTime};

use crate::model::{Ms, Span};

use super::error::BookingError;

/// A slot's time range after validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatedInterval {
    pub date: NaiveDate,
    pub span: Span,
    /// Duration in fractional hours.
    pub hours: f64,
}

pub fn parse_date(date: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
}

fn parse_time(time: &str) -> Result<NaiveTime, chrono::ParseError> {
    let time = time.trim();
    NaiveTime::parse_from_str(time, "%H:%M:%S").or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
}

fn instant(date: NaiveDate, time: NaiveTime) -> Ms {
    date.and_time(time).and_utc().timestamp_millis()
}

/// Combine a date and two wall-clock times into a half-open span on that date.
/// Fails if anything is unparsable or the end is not after the start.
pub fn validate(date: &str, start: &str, end: &str) -> Result<ValidatedInterval, BookingError> {
    let invalid = || BookingError::InvalidInterval {
        date: date.to_string(),
        start: start.to_string(),
        end: end.to_string(),
    };

    let day = parse_date(date).map_err(|_| invalid())?;
    let start_at = instant(day, parse_time(start).map_err(|_| invalid())?);
    let end_at = instant(day, parse_time(end).map_err(|_| invalid())?);
    if end_at <= start_at {
        return Err(invalid());
    }

    let span = Span::new(start_at, end_at);
    Ok(ValidatedInterval {
        date: day,
        span,
        hours: span.hours(),
    })
}
