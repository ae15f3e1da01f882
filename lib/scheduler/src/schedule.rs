//! Five-field cron schedules.
//!
//! Fields are minute, hour, day of month, month and day of week, each a
//! comma-separated list of `*`, `n`, `a-b`, with an optional `/step`. Day of
//! week accepts 0-7 with both 0 and 7 meaning Sunday. As in classic cron,
//! when both day fields are restricted a day matches if either one does.
//! Schedules are evaluated in UTC.

use crate::error::ScheduleError;
use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc};

/// Search horizon for [`CronSchedule::next_after`].
const MAX_LOOKAHEAD_DAYS: i64 = 366 * 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    /// False when the field was written as `*` (or `*/n`).
    restricted: bool,
}

impl Field {
    fn contains(&self, value: u32) -> bool {
        value < 64 && self.bits & (1u64 << value) != 0
    }

    fn parse(spec: &str, min: u32, max: u32) -> Result<Self, String> {
        let mut bits = 0u64;
        for item in spec.split(',') {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| format!("invalid step '{step}'"))?;
                    if step == 0 {
                        return Err("step must be positive".to_string());
                    }
                    (range, step)
                }
                None => (item, 1),
            };

            let (start, end) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                (parse_value(a, min, max)?, parse_value(b, min, max)?)
            } else {
                let start = parse_value(range, min, max)?;
                // `5/15` runs from 5 to the end of the range
                (start, if item.contains('/') { max } else { start })
            };
            if start > end {
                return Err(format!("range {start}-{end} is reversed"));
            }

            let mut value = start;
            while value <= end {
                bits |= 1u64 << value;
                value += step;
            }
        }

        Ok(Self {
            bits,
            restricted: !spec.starts_with('*'),
        })
    }
}

fn parse_value(text: &str, min: u32, max: u32) -> Result<u32, String> {
    let value: u32 = text
        .parse()
        .map_err(|_| format!("invalid value '{text}'"))?;
    if value < min || value > max {
        return Err(format!("{value} is outside {min}-{max}"));
    }
    Ok(value)
}

/// A parsed cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: Field,
    hours: Field,
    days_of_month: Field,
    months: Field,
    days_of_week: Field,
}

impl CronSchedule {
    /// Parses a five-field cron expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression does not have five valid fields.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let invalid = |reason: String| ScheduleError::InvalidCronExpression {
            expression: expression.to_string(),
            reason,
        };

        let parts: Vec<&str> = expression.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = parts.as_slice() else {
            return Err(invalid(format!("expected 5 fields, got {}", parts.len())));
        };

        let mut days_of_week = Field::parse(dow, 0, 7).map_err(invalid)?;
        if days_of_week.contains(7) {
            days_of_week.bits |= 1;
        }

        Ok(Self {
            expression: expression.to_string(),
            minutes: Field::parse(minute, 0, 59).map_err(invalid)?,
            hours: Field::parse(hour, 0, 23).map_err(invalid)?,
            days_of_month: Field::parse(dom, 1, 31).map_err(invalid)?,
            months: Field::parse(month, 1, 12).map_err(invalid)?,
            days_of_week,
        })
    }

    /// The expression this schedule was parsed from.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn day_matches(&self, at: DateTime<Utc>) -> bool {
        let dom = self.days_of_month.contains(at.day());
        let dow = self
            .days_of_week
            .contains(at.weekday().num_days_from_sunday());
        if self.days_of_month.restricted && self.days_of_week.restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// Returns true if the schedule fires in the minute containing `at`.
    #[must_use]
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.months.contains(at.month())
            && self.day_matches(at)
            && self.hours.contains(at.hour())
            && self.minutes.contains(at.minute())
    }

    /// The first firing minute strictly after `after`.
    ///
    /// Returns `None` for schedules that never fire, such as `0 0 30 2 *`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut at = after.duration_trunc(Duration::minutes(1)).ok()? + Duration::minutes(1);
        let horizon = after + Duration::days(MAX_LOOKAHEAD_DAYS);

        while at <= horizon {
            if !self.months.contains(at.month()) || !self.day_matches(at) {
                let midnight = at.duration_trunc(Duration::days(1)).ok()?;
                at = midnight + Duration::days(1);
                continue;
            }
            if !self.hours.contains(at.hour()) {
                let hour = at.duration_trunc(Duration::hours(1)).ok()?;
                at = hour + Duration::hours(1);
                continue;
            }
            if self.minutes.contains(at.minute()) {
                return Some(at);
            }
            at += Duration::minutes(1);
        }
        None
    }
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expression)
    }
}
