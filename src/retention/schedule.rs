//! Standard five-field cron schedules evaluated in UTC.
//!
//! Only the boundary math lives here: [`Schedule::next_after`] and
//! [`Schedule::anchor_at_or_before`] are pure functions of the schedule and a
//! timestamp, independent of the wall clock.

use thiserror::Error;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

/// Searching further than this many years ahead gives up; long enough for
/// leap-day schedules across a skipped century leap year.
const SEARCH_YEARS: i32 = 9;

/// Lower bounds tried, in order, when looking for the boundary at or before T.
const ANCHOR_WINDOWS: [time::Duration; 5] = [
    time::Duration::hours(1),
    time::Duration::days(1),
    time::Duration::days(32),
    time::Duration::days(366),
    time::Duration::days(8 * 366),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("expected 5 fields in {expr:?}, found {found}")]
    FieldCount { expr: String, found: usize },
    #[error("invalid {field} field {value:?}: {reason}")]
    Field {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("unsupported descriptor {0:?}")]
    Descriptor(String),
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    expr: String,
    minutes: u64,
    hours: u32,
    days_of_month: u32,
    months: u16,
    days_of_week: u8,
    dom_restricted: bool,
    dow_restricted: bool,
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &[
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ],
};
// 7 is accepted as an alias for Sunday and folded onto 0 after parsing.
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &["sun", "mon", "tue", "wed", "thu", "fri", "sat"],
};

impl Schedule {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let trimmed = expr.trim();
        let expanded = if trimmed.starts_with('@') {
            descriptor(trimmed)?
        } else {
            trimmed
        };
        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::FieldCount {
                expr: expr.to_string(),
                found: fields.len(),
            });
        }
        let minutes = parse_field(fields[0], &MINUTE)?;
        let hours = parse_field(fields[1], &HOUR)?;
        let days_of_month = parse_field(fields[2], &DAY_OF_MONTH)?;
        let months = parse_field(fields[3], &MONTH)?;
        let mut days_of_week = parse_field(fields[4], &DAY_OF_WEEK)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }
        Ok(Self {
            expr: trimmed.to_string(),
            minutes,
            hours: hours as u32,
            days_of_month: days_of_month as u32,
            months: months as u16,
            days_of_week: days_of_week as u8,
            dom_restricted: !is_wildcard(fields[2]),
            dow_restricted: !is_wildcard(fields[4]),
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// True when `at` (truncated to the minute) is a boundary of this schedule.
    pub fn fires_at(&self, at: OffsetDateTime) -> bool {
        let at = at.to_offset(UtcOffset::UTC);
        self.month_matches(at.month())
            && self.day_matches(at.date())
            && self.hours & (1 << at.hour()) != 0
            && self.minutes & (1 << at.minute()) != 0
    }

    /// First boundary strictly after `after`.
    pub fn next_after(&self, after: OffsetDateTime) -> Option<OffsetDateTime> {
        let after = after.to_offset(UtcOffset::UTC);
        let minute_start = Time::from_hms(after.hour(), after.minute(), 0).ok()?;
        let mut at =
            PrimitiveDateTime::new(after.date(), minute_start) + time::Duration::minutes(1);
        let year_limit = at.year() + SEARCH_YEARS;
        loop {
            if at.year() > year_limit {
                return None;
            }
            if !self.month_matches(at.month()) {
                at = PrimitiveDateTime::new(first_of_next_month(at.date())?, Time::MIDNIGHT);
                continue;
            }
            if !self.day_matches(at.date()) {
                at = PrimitiveDateTime::new(at.date().next_day()?, Time::MIDNIGHT);
                continue;
            }
            if self.hours & (1 << at.hour()) == 0 {
                let hour_start = Time::from_hms(at.hour(), 0, 0).ok()?;
                at = PrimitiveDateTime::new(at.date(), hour_start) + time::Duration::hours(1);
                continue;
            }
            if self.minutes & (1 << at.minute()) == 0 {
                at += time::Duration::minutes(1);
                continue;
            }
            return Some(at.assume_utc());
        }
    }

    /// Latest boundary at or before `at`.
    ///
    /// Walks the schedule forward from a lower bound until the next boundary
    /// would pass `at`. The lower bound widens until a window contains at least
    /// one boundary.
    pub fn anchor_at_or_before(&self, at: OffsetDateTime) -> Option<OffsetDateTime> {
        let at = at.to_offset(UtcOffset::UTC);
        for window in ANCHOR_WINDOWS {
            let Some(mut boundary) = self.next_after(at - window) else {
                continue;
            };
            if boundary > at {
                continue;
            }
            while let Some(next) = self.next_after(boundary) {
                if next > at {
                    break;
                }
                boundary = next;
            }
            return Some(boundary);
        }
        None
    }

    fn month_matches(&self, month: Month) -> bool {
        self.months & (1 << u8::from(month)) != 0
    }

    fn day_matches(&self, date: Date) -> bool {
        let dom = self.days_of_month & (1 << date.day()) != 0;
        let dow = self.days_of_week & (1 << date.weekday().number_days_from_sunday()) != 0;
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expr)
    }
}

fn descriptor(expr: &str) -> Result<&'static str, ScheduleError> {
    match expr.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => Ok("0 0 1 1 *"),
        "@monthly" => Ok("0 0 1 * *"),
        "@weekly" => Ok("0 0 * * 0"),
        "@daily" | "@midnight" => Ok("0 0 * * *"),
        "@hourly" => Ok("0 * * * *"),
        _ => Err(ScheduleError::Descriptor(expr.to_string())),
    }
}

fn is_wildcard(field: &str) -> bool {
    field.starts_with('*') || field.starts_with('?')
}

fn first_of_next_month(date: Date) -> Option<Date> {
    let (year, month) = match date.month() {
        Month::December => (date.year() + 1, Month::January),
        month => (date.year(), month.next()),
    };
    Date::from_calendar_date(year, month, 1).ok()
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<u64, ScheduleError> {
    let invalid = |reason: String| ScheduleError::Field {
        field: spec.name,
        value: field.to_string(),
        reason,
    };
    let mut bits = 0u64;
    for part in field.split(',') {
        if part.is_empty() {
            return Err(invalid("empty list element".to_string()));
        }
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("bad step {step:?}")))?;
                if step == 0 {
                    return Err(invalid("step must be positive".to_string()));
                }
                if step > spec.max {
                    return Err(invalid(format!("step {step} exceeds {}", spec.max)));
                }
                (range, Some(step))
            }
            None => (part, None),
        };
        let (start, end) = if range == "*" || range == "?" {
            (spec.min, spec.max)
        } else if let Some((low, high)) = range.split_once('-') {
            (
                parse_value(low, spec).map_err(&invalid)?,
                parse_value(high, spec).map_err(&invalid)?,
            )
        } else {
            let value = parse_value(range, spec).map_err(&invalid)?;
            // `a/n` means every n-th value starting at a.
            (value, if step.is_some() { spec.max } else { value })
        };
        if start > end {
            return Err(invalid(format!("range {start}-{end} is reversed")));
        }
        let step = step.unwrap_or(1);
        let mut value = start;
        while value <= end {
            bits |= 1 << value;
            let Some(next) = value.checked_add(step) else {
                break;
            };
            value = next;
        }
    }
    Ok(bits)
}

fn parse_value(text: &str, spec: &FieldSpec) -> Result<u32, String> {
    let lower = text.to_ascii_lowercase();
    if let Some(index) = spec.names.iter().position(|name| *name == lower) {
        // Name tables start at the field minimum.
        return Ok(index as u32 + spec.min);
    }
    let value: u32 = text
        .parse()
        .map_err(|_| format!("{text:?} is not a number"))?;
    if value < spec.min || value > spec.max {
        return Err(format!("{value} is outside {}-{}", spec.min, spec.max));
    }
    Ok(value)
}
