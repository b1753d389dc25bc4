//! Five-field cron expressions: `minute hour day-of-month month day-of-week`.
//!
//! Each field accepts `*`, single values, ranges (`a-b`), steps (`*/n`,
//! `a-b/n`, `a/n`) and comma lists. Months and weekdays also accept
//! three-letter names. Day-of-week runs 0–7 where both 0 and 7 are Sunday.
//! When both day fields are restricted a day matches if either one matches
//! (classic crontab behaviour).

use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;

use crate::error::{Result, SchedulerError};

/// Search horizon for the next fire time. Covers the 28-year weekday/leap cycle.
const MAX_YEARS_AHEAD: i32 = 30;
/// Largest DST shift handled when replaying a repeated hour.
const FOLD_LOOKBACK_HOURS: i64 = 2;

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

struct FieldSpec {
    label: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MINUTE: FieldSpec = FieldSpec { label: "minute", min: 0, max: 59, names: &[] };
const HOUR: FieldSpec = FieldSpec { label: "hour", min: 0, max: 23, names: &[] };
const DAY_OF_MONTH: FieldSpec = FieldSpec { label: "day-of-month", min: 1, max: 31, names: &[] };
const MONTH: FieldSpec = FieldSpec { label: "month", min: 1, max: 12, names: MONTH_NAMES };
const DAY_OF_WEEK: FieldSpec = FieldSpec { label: "day-of-week", min: 0, max: 7, names: WEEKDAY_NAMES };

/// A parsed cron expression. Each field is a bitset of allowed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_wildcard: bool,
    dow_wildcard: bool,
    hour_wildcard: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::invalid(
                expression,
                format!("expected 5 fields, found {}", fields.len()),
            ));
        }

        let mut days_of_week = parse_field(expression, fields[4], &DAY_OF_WEEK)?;
        // 7 is an alias for Sunday.
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            expression: fields.join(" "),
            minutes: parse_field(expression, fields[0], &MINUTE)?,
            hours: parse_field(expression, fields[1], &HOUR)?,
            days_of_month: parse_field(expression, fields[2], &DAY_OF_MONTH)?,
            months: parse_field(expression, fields[3], &MONTH)?,
            days_of_week,
            dom_wildcard: fields[2].starts_with('*'),
            dow_wildcard: fields[4].starts_with('*'),
            hour_wildcard: fields[1] == "*",
        })
    }

    /// Normalized expression text (single spaces).
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`, evaluated in `tz`.
    ///
    /// Returns `None` when nothing matches within the search horizon
    /// (e.g. `0 0 30 2 *`). Local times that fall into a DST gap are
    /// skipped. Ambiguous local times resolve to the earlier instant, except
    /// that an expression with `*` in the hour field also fires during the
    /// second pass through a repeated hour.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&tz).naive_local();
        let start = truncate_to_minute(local)? + Duration::minutes(1);
        let horizon =
            NaiveDate::from_ymd_opt(start.year() + MAX_YEARS_AHEAD + 1, 1, 1)?.and_time(NaiveTime::MIN);

        let first = self.walk(start, horizon, |t| match tz.from_local_datetime(&t) {
            LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                Some(dt.with_timezone(&Utc)).filter(|fire| *fire > after)
            }
            LocalResult::None => None,
        });
        if !self.hour_wildcard {
            return first;
        }

        // Later occurrences of a repeated hour sit behind `after` in wall-clock
        // order, so look back over the fold and stop shortly past `first`.
        let fold = Duration::hours(FOLD_LOOKBACK_HOURS);
        let from = truncate_to_minute(local.checked_sub_signed(fold)?)?;
        let until = first
            .map_or(horizon, |f| f.with_timezone(&tz).naive_local())
            .checked_add_signed(fold)?;
        let repeat = self.walk(from, until, |t| match tz.from_local_datetime(&t) {
            LocalResult::Ambiguous(_, later) => {
                Some(later.with_timezone(&Utc)).filter(|fire| *fire > after)
            }
            _ => None,
        });

        match (first, repeat) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Walk matching wall-clock minutes from `t` (inclusive) until `stop`,
    /// returning the first one `resolve` maps to an instant.
    fn walk(
        &self,
        mut t: NaiveDateTime,
        stop: NaiveDateTime,
        resolve: impl Fn(NaiveDateTime) -> Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        loop {
            if t >= stop {
                return None;
            }
            if !bit(self.months, t.month()) {
                t = start_of_next_month(t.date())?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_time(NaiveTime::MIN);
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            if let Some(fire) = resolve(t) {
                return Some(fire);
            }
            t += Duration::minutes(1);
        }
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = bit(self.days_of_month, date.day());
        let dow = bit(self.days_of_week, date.weekday().num_days_from_sunday());
        if self.dom_wildcard || self.dow_wildcard {
            dom && dow
        } else {
            dom || dow
        }
    }
}

impl FromStr for CronSchedule {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

fn bit(set: u64, value: u32) -> bool {
    set & (1u64 << value) != 0
}

fn truncate_to_minute(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.with_second(0)?.with_nanosecond(0)
}

fn start_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    Some(NaiveDate::from_ymd_opt(year, month, 1)?.and_time(NaiveTime::MIN))
}

fn parse_field(expression: &str, field: &str, spec: &FieldSpec) -> Result<u64> {
    let mut set = 0u64;
    for part in field.split(',') {
        if part.is_empty() {
            return Err(SchedulerError::invalid(
                expression,
                format!("empty list item in {} field", spec.label),
            ));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| {
                    SchedulerError::invalid(
                        expression,
                        format!("bad step '{step}' in {} field", spec.label),
                    )
                })?;
                if step == 0 {
                    return Err(SchedulerError::invalid(
                        expression,
                        format!("step must be positive in {} field", spec.label),
                    ));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (
                parse_value(expression, a, spec)?,
                parse_value(expression, b, spec)?,
            )
        } else {
            let v = parse_value(expression, range, spec)?;
            // `a/n` means "from a to the end of the range, every n".
            if step.is_some() {
                (v, spec.max)
            } else {
                (v, v)
            }
        };

        if lo > hi {
            return Err(SchedulerError::invalid(
                expression,
                format!("range {lo}-{hi} is reversed in {} field", spec.label),
            ));
        }

        for v in (lo..=hi).step_by(step.unwrap_or(1) as usize) {
            set |= 1u64 << v;
        }
    }
    Ok(set)
}

fn parse_value(expression: &str, text: &str, spec: &FieldSpec) -> Result<u32> {
    let value = match text.parse::<u32>() {
        Ok(v) => v,
        Err(_) => spec
            .names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(text))
            .map(|i| i as u32 + spec.min)
            .ok_or_else(|| {
                SchedulerError::invalid(
                    expression,
                    format!("'{text}' is not valid in {} field", spec.label),
                )
            })?,
    };
    if value < spec.min || value > spec.max {
        return Err(SchedulerError::invalid(
            expression,
            format!(
                "{value} is outside {}-{} in {} field",
                spec.min, spec.max, spec.label
            ),
        ));
    }
    Ok(value)
}
