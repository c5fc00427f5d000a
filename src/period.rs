use crate::*;

use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use regex::Regex;

/// Longest custom range accepted for per-expense statistics.
pub const MAX_EXPENSE_PERIOD_DAYS: i64 = 31;

/// Day-aligned range: `start` is local 00:00:00.000000000 of the first day,
/// `end` is local 23:59:59.999999999 of the last day.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimePeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimePeriod {
    pub fn from_days(first: NaiveDate, last: NaiveDate) -> Self {
        TimePeriod {
            start: start_of_day(first),
            end: end_of_day(last),
        }
    }

    pub fn today(now: DateTime<Local>) -> Self {
        let today = now.date_naive();
        Self::from_days(today, today)
    }

    /// The last seven days, today included.
    pub fn week(now: DateTime<Local>) -> Self {
        let today = now.date_naive();
        Self::from_days(today - Duration::days(6), today)
    }

    /// The last thirty days, today included.
    pub fn month(now: DateTime<Local>) -> Self {
        let today = now.date_naive();
        Self::from_days(today - Duration::days(29), today)
    }

    pub fn all_time(now: DateTime<Local>) -> Self {
        let epoch = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN);
        Self::from_days(epoch, now.date_naive())
    }

    /// Whole days between the boundaries, rounded down.
    pub fn days_between(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn ensure_max_days(&self, max_days: i64) -> Result<(), PeriodError> {
        if self.days_between() > max_days {
            return Err(PeriodError::TooLong { max_days });
        }
        Ok(())
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        *timestamp > self.start && *timestamp < self.end
    }

    /// `"DD.MM.YY - DD.MM.YY"` in local time.
    pub fn format(&self) -> String {
        format!("{} - {}", format_date(&self.start), format_date(&self.end))
    }
}

pub fn format_date(timestamp: &DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format("%d.%m.%y").to_string()
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    local_to_utc(date.and_time(NaiveTime::MIN))
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let last_moment = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or(NaiveTime::MIN);
    local_to_utc(date.and_time(last_moment))
}

// A local time skipped by a DST jump is read as UTC.
fn local_to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

/// Parses a user-typed range. Accepted forms:
/// `03.04.25 07.04.25`, `03.04.25-07.04.25`, `03.04.2025 - 07.04.2025`,
/// `03.04 07.04` and `03.04-07.04` (year of `today`).
pub fn parse_custom_period(input: &str, today: NaiveDate) -> Result<TimePeriod, PeriodError> {
    let input = input.trim();

    let parts: Vec<&str> = if input.contains('-') {
        input.split('-').map(str::trim).collect()
    } else {
        input.split_whitespace().collect()
    };

    if parts.len() != 2 {
        return Err(PeriodError::Format);
    }

    let first = parse_date(parts[0], today).map_err(|e| PeriodError::Start(Box::new(e)))?;
    let last = parse_date(parts[1], today).map_err(|e| PeriodError::End(Box::new(e)))?;

    if first > last {
        return Err(PeriodError::StartAfterEnd);
    }

    Ok(TimePeriod::from_days(first, last))
}

fn parse_date(text: &str, today: NaiveDate) -> Result<NaiveDate, PeriodError> {
    let re = Regex::new(r"^(\d{1,2})\.(\d{1,2})(?:\.(\d{2,4}))?$").map_err(|_| PeriodError::DateFormat)?;
    let captures = re.captures(text).ok_or(PeriodError::DateFormat)?;

    let day: u32 = captures[1].parse().map_err(|_| PeriodError::DateFormat)?;
    let month: u32 = captures[2].parse().map_err(|_| PeriodError::DateFormat)?;
    let year = match captures.get(3) {
        Some(year) => expand_year(year.as_str().parse().map_err(|_| PeriodError::DateFormat)?),
        None => today.year(),
    };

    if !(1..=12).contains(&month) {
        return Err(PeriodError::Month);
    }
    if !(1..=31).contains(&day) {
        return Err(PeriodError::Day);
    }

    NaiveDate::from_ymd_opt(year, month, day).ok_or(PeriodError::NonexistentDate)
}

// Two-digit years: 00-49 are 20xx, 50-99 are 19xx.
fn expand_year(year: i32) -> i32 {
    match year {
        0..=49 => year + 2000,
        50..=99 => year + 1900,
        _ => year,
    }
}
