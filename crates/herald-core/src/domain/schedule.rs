//! Cron schedules for recurring tasks and time-based rules.
//!
//! Accepts standard 5-field expressions (`MIN HOUR DOM MON DOW`) and the
//! 6/7-field seconds-first form understood by the `cron` crate. 5-field
//! expressions are normalised before parsing:
//! - a `0` seconds field is prepended
//! - numeric day-of-week (0-7, Sunday = 0 or 7) is rewritten as day names,
//!   because the crate numbers days 1-7 starting at Sunday

use std::str::FromStr;

use chrono::{DateTime, Utc};

use super::errors::{HeraldError, Result};

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => format!(
                "0 {} {} {} {} {}",
                fields[0],
                fields[1],
                fields[2],
                fields[3],
                normalize_day_of_week(expression, fields[4])?
            ),
            6 | 7 => fields.join(" "),
            n => {
                return Err(HeraldError::validation(format!(
                    "cron expression '{expression}' has {n} fields, expected 5"
                )));
            }
        };

        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| {
            HeraldError::validation(format!("invalid cron expression '{expression}': {e}"))
        })?;

        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First occurrence strictly after `reference`.
    pub fn next_after(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&reference).next()
    }

    pub fn upcoming(&self, reference: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&reference).take(count).collect()
    }

    /// Whether an occurrence falls in `(since, until]`.
    pub fn fires_between(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> bool {
        self.next_after(since).is_some_and(|next| next <= until)
    }
}

fn normalize_day_of_week(expression: &str, field: &str) -> Result<String> {
    let invalid =
        |detail: &str| HeraldError::validation(format!("invalid cron expression '{expression}': {detail}"));

    let mut days: Vec<usize> = Vec::new();
    let mut passthrough: Vec<&str> = Vec::new();

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| invalid("day-of-week step must be a number"))?;
                if step == 0 {
                    return Err(invalid("day-of-week step must be positive"));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        if range.chars().any(|c| c.is_ascii_alphabetic()) {
            passthrough.push(part);
            continue;
        }

        let (start, end) = match range {
            "*" | "?" if step.is_none() => return Ok(field.to_string()),
            "*" | "?" => (0, 6),
            _ => match range.split_once('-') {
                Some((a, b)) => (parse_day(a, &invalid)?, parse_day(b, &invalid)?),
                None => {
                    let d = parse_day(range, &invalid)?;
                    // "5/2" means "from 5 to the end of the week, every 2"
                    (d, if step.is_some() { 7 } else { d })
                }
            },
        };
        if start > end {
            return Err(invalid("day-of-week range is reversed"));
        }
        days.extend((start..=end).step_by(step.unwrap_or(1)).map(|d| d % 7));
    }

    days.sort_unstable();
    days.dedup();
    let mut out: Vec<String> = days.into_iter().map(|d| DAY_NAMES[d].to_string()).collect();
    out.extend(passthrough.into_iter().map(str::to_string));
    Ok(out.join(","))
}

fn parse_day(raw: &str, invalid: &dyn Fn(&str) -> HeraldError) -> Result<usize> {
    let day: usize = raw
        .parse()
        .map_err(|_| invalid("day-of-week must be 0-7 or a day name"))?;
    if day > 7 {
        return Err(invalid("day-of-week must be 0-7"));
    }
    Ok(day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn hourly_advances_to_next_hour() {
        let cron = CronSchedule::parse("0 * * * *").unwrap();
        let next = cron.next_after(at(2026, 10, 17, 12, 0, 5)).unwrap();
        assert_eq!(next, at(2026, 10, 17, 13, 0, 0));
    }

    #[test]
    fn next_is_strictly_after_reference() {
        let cron = CronSchedule::parse("0 * * * *").unwrap();
        let next = cron.next_after(at(2026, 10, 17, 12, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 10, 17, 13, 0, 0));
    }

    // 2026-10-17 is a Saturday.
    #[rstest]
    #[case("30 9 * * 1-5", at(2026, 10, 19, 9, 30, 0))]
    #[case("0 0 * * 0", at(2026, 10, 18, 0, 0, 0))]
    #[case("0 0 * * 7", at(2026, 10, 18, 0, 0, 0))]
    #[case("0 8 * * MON", at(2026, 10, 19, 8, 0, 0))]
    #[case("*/15 * * * *", at(2026, 10, 17, 10, 15, 0))]
    #[case("0 12 1 * *", at(2026, 11, 1, 12, 0, 0))]
    fn five_field_expressions(#[case] expr: &str, #[case] expected: DateTime<Utc>) {
        let cron = CronSchedule::parse(expr).unwrap();
        assert_eq!(cron.next_after(at(2026, 10, 17, 10, 2, 0)).unwrap(), expected);
    }

    #[rstest]
    #[case("bad")]
    #[case("* * *")]
    #[case("61 * * * *")]
    #[case("0 25 * * *")]
    #[case("0 0 * * 9")]
    #[case("0 0 * * 5-2")]
    fn rejects_malformed(#[case] expr: &str) {
        let err = CronSchedule::parse(expr).unwrap_err();
        assert!(matches!(err, HeraldError::Validation(_)), "{expr}: {err}");
    }

    #[test]
    fn day_of_week_ranges_cross_sunday_names() {
        assert_eq!(normalize_day_of_week("", "5-7").unwrap(), "SUN,FRI,SAT");
        assert_eq!(normalize_day_of_week("", "*/2").unwrap(), "SUN,TUE,THU,SAT");
        assert_eq!(normalize_day_of_week("", "*").unwrap(), "*");
    }

    #[test]
    fn upcoming_lists_in_order() {
        let cron = CronSchedule::parse("0 9 * * *").unwrap();
        let runs = cron.upcoming(at(2026, 10, 17, 10, 0, 0), 3);
        assert_eq!(
            runs,
            vec![
                at(2026, 10, 18, 9, 0, 0),
                at(2026, 10, 19, 9, 0, 0),
                at(2026, 10, 20, 9, 0, 0)
            ]
        );
    }

    #[test]
    fn fires_between_is_half_open() {
        let cron = CronSchedule::parse("0 9 * * *").unwrap();
        assert!(cron.fires_between(at(2026, 10, 17, 8, 0, 0), at(2026, 10, 17, 9, 0, 0)));
        assert!(!cron.fires_between(at(2026, 10, 17, 9, 0, 0), at(2026, 10, 17, 10, 0, 0)));
    }
}
