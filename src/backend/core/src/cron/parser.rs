//! 5-field cron expression parsing and next-fire computation.

use chrono::{DateTime, Datelike, Duration, Local, Timelike};

use crate::error::{ErrorCode, Result, TaskHubError};

/// One year of minutes; the lookahead bound for `next`.
const MAX_LOOKAHEAD_MINUTES: i64 = 365 * 24 * 60;

fn invalid(msg: impl Into<String>) -> TaskHubError {
    TaskHubError::new(ErrorCode::CronSpecInvalid, msg)
}

/// A parsed `min hour dom month dow` expression supporting `*`, ranges
/// `a-b`, steps `*/n` and `a-b/n`, and comma lists.
#[derive(Debug, Clone)]
pub struct CronExpr {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days: Vec<u32>,
    months: Vec<u32>,
    /// 0 = Sunday.
    weekdays: Vec<u32>,
}

impl CronExpr {
    pub fn parse(spec: &str) -> Result<CronExpr> {
        let fields: Vec<&str> = spec.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("cron spec needs exactly 5 fields, got {}", fields.len())));
        }
        Ok(CronExpr {
            minutes: parse_field(fields[0], 0, 59)?,
            hours: parse_field(fields[1], 0, 23)?,
            days: parse_field(fields[2], 1, 31)?,
            months: parse_field(fields[3], 1, 12)?,
            weekdays: parse_field(fields[4], 0, 6)?,
        })
    }

    /// Nearest minute-aligned time strictly after `now` satisfying every
    /// field, bounded by one year of lookahead.
    pub fn next(&self, now: DateTime<Local>) -> Result<DateTime<Local>> {
        let mut minute_ok = [false; 60];
        let mut hour_ok = [false; 24];
        let mut day_ok = [false; 32];
        let mut month_ok = [false; 13];
        let mut weekday_ok = [false; 7];
        for &v in &self.minutes {
            minute_ok[v as usize] = true;
        }
        for &v in &self.hours {
            hour_ok[v as usize] = true;
        }
        for &v in &self.days {
            day_ok[v as usize] = true;
        }
        for &v in &self.months {
            month_ok[v as usize] = true;
        }
        for &v in &self.weekdays {
            weekday_ok[v as usize] = true;
        }

        let base = now
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now)
            + Duration::minutes(1);

        for i in 0..MAX_LOOKAHEAD_MINUTES {
            let candidate = base + Duration::minutes(i);
            if !month_ok[candidate.month() as usize] {
                continue;
            }
            if !day_ok[candidate.day() as usize] {
                continue;
            }
            if !weekday_ok[candidate.weekday().num_days_from_sunday() as usize] {
                continue;
            }
            if !hour_ok[candidate.hour() as usize] {
                continue;
            }
            if !minute_ok[candidate.minute() as usize] {
                continue;
            }
            return Ok(candidate);
        }

        Err(invalid("no matching time within one year"))
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<Vec<u32>> {
    if field.is_empty() {
        return Err(invalid("empty cron field"));
    }

    let mut seen = vec![false; (max - min + 1) as usize];
    for token in field.split(',') {
        if token.is_empty() {
            return Err(invalid("empty cron field token"));
        }
        for v in parse_range(token, min, max)? {
            seen[(v - min) as usize] = true;
        }
    }

    let values: Vec<u32> = seen
        .iter()
        .enumerate()
        .filter_map(|(i, &set)| set.then_some(min + i as u32))
        .collect();
    if values.is_empty() {
        return Err(invalid("cron field produces no values"));
    }
    Ok(values)
}

fn parse_range(token: &str, min: u32, max: u32) -> Result<Vec<u32>> {
    let (base, step) = match token.split_once('/') {
        Some((base, step_str)) => {
            let step: u32 = step_str.parse().map_err(|_| invalid(format!("invalid cron step: {token}")))?;
            if step == 0 {
                return Err(invalid("cron step must be positive"));
            }
            (base, step)
        }
        None => (token, 1),
    };

    let (start, end) = if base == "*" {
        (min, max)
    } else if let Some((lo, hi)) = base.split_once('-') {
        let lo: u32 = lo.parse().map_err(|_| invalid(format!("invalid cron range: {token}")))?;
        let hi: u32 = hi.parse().map_err(|_| invalid(format!("invalid cron range: {token}")))?;
        (lo, hi)
    } else {
        let v: u32 = base.parse().map_err(|_| invalid(format!("invalid cron value: {token}")))?;
        (v, v)
    };

    if start < min || end > max || start > end {
        return Err(invalid(format!("cron range out of bounds: {token}")));
    }

    Ok((start..=end).step_by(step as usize).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, 30).unwrap()
    }

    #[test]
    fn every_minute_advances_to_next_boundary() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        let now = at(2025, 6, 1, 10, 15);
        let next = expr.next(now).unwrap();
        assert!(next > now);
        assert_eq!(next.minute(), 16);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn steps_ranges_and_lists() {
        assert_eq!(parse_field("*/15", 0, 59).unwrap(), vec![0, 15, 30, 45]);
        assert_eq!(parse_field("1-5/2", 0, 59).unwrap(), vec![1, 3, 5]);
        assert_eq!(parse_field("3,1,59", 0, 59).unwrap(), vec![1, 3, 59]);
        assert_eq!(parse_field("10-12", 0, 23).unwrap(), vec![10, 11, 12]);
    }

    #[test]
    fn specific_time_fields_all_satisfied() {
        // 03:30 on the 15th of every month
        let expr = CronExpr::parse("30 3 15 * *").unwrap();
        let next = expr.next(at(2025, 6, 1, 10, 0)).unwrap();
        assert_eq!((next.day(), next.hour(), next.minute()), (15, 3, 30));
    }

    #[test]
    fn weekday_field() {
        // Sundays at noon
        let expr = CronExpr::parse("0 12 * * 0").unwrap();
        let next = expr.next(at(2025, 6, 2, 0, 0)).unwrap();
        assert_eq!(next.weekday().num_days_from_sunday(), 0);
        assert_eq!(next.hour(), 12);
    }

    #[test]
    fn next_is_strictly_future_even_on_boundary() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        let boundary = Local.with_ymd_and_hms(2025, 6, 1, 10, 15, 0).unwrap();
        let next = expr.next(boundary).unwrap();
        assert_eq!(next, boundary + Duration::minutes(1));
    }

    #[test]
    fn pause_collapses_to_single_future_slot() {
        // After a simulated 3-minute pause, next() from the resumed "now"
        // yields one future slot, not a backlog.
        let expr = CronExpr::parse("*/1 * * * *").unwrap();
        let before_pause = at(2025, 6, 1, 10, 0);
        let resumed = before_pause + Duration::minutes(3);
        let next = expr.next(resumed).unwrap();
        assert!(next > resumed);
        assert_eq!(next.minute(), 4);
    }

    #[test]
    fn rejects_malformed_specs() {
        assert!(CronExpr::parse("* * * *").is_err());
        assert!(CronExpr::parse("61 * * * *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("5-2 * * * *").is_err());
        assert!(CronExpr::parse("a * * * *").is_err());
    }
}
