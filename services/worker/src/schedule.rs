//! Run schedule: fixed UTC instants parsed from a cron expression.
//!
//! The schedule is stateless. A fire that is missed while the worker is
//! down is not made up; the next instant simply proceeds. At-least-once
//! delivery is fine because the audit upsert is idempotent on `updated_at`.

use chrono::{DateTime, Duration, Utc};

use matopiba_core::{ForecastError, ForecastResult};

/// Fixed daily run instants in UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    minute: u32,
    hours: Vec<u32>,
}

impl Schedule {
    /// Parse a five-field cron expression restricted to a fixed minute and
    /// an hour list (e.g. `0 0,6,12,18 * * *`). Day, month, and weekday
    /// fields must be `*`.
    pub fn parse(expr: &str) -> ForecastResult<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ForecastError::MissingConfig(format!(
                "SCHEDULE_CRON must have five fields, got {:?}",
                expr
            )));
        }

        let minute: u32 = fields[0].parse().map_err(|_| {
            ForecastError::MissingConfig(format!("unsupported cron minute field {:?}", fields[0]))
        })?;
        if minute > 59 {
            return Err(ForecastError::MissingConfig(format!(
                "cron minute {} out of range",
                minute
            )));
        }

        let mut hours = Vec::new();
        for part in fields[1].split(',') {
            let hour: u32 = part.parse().map_err(|_| {
                ForecastError::MissingConfig(format!("unsupported cron hour field {:?}", fields[1]))
            })?;
            if hour > 23 {
                return Err(ForecastError::MissingConfig(format!(
                    "cron hour {} out of range",
                    hour
                )));
            }
            hours.push(hour);
        }
        hours.sort_unstable();
        hours.dedup();
        if hours.is_empty() {
            return Err(ForecastError::MissingConfig(
                "cron hour list is empty".to_string(),
            ));
        }

        for field in &fields[2..] {
            if *field != "*" {
                return Err(ForecastError::MissingConfig(format!(
                    "only minute and hour cron fields are supported, got {:?}",
                    expr
                )));
            }
        }

        Ok(Self { minute, hours })
    }

    /// The next scheduled instant strictly after `after`.
    pub fn next_fire(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        for day_offset in 0..=1i64 {
            let date = after.date_naive() + Duration::days(day_offset);
            for &hour in &self.hours {
                if let Some(naive) = date.and_hms_opt(hour, self.minute, 0) {
                    let candidate = DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc);
                    if candidate > after {
                        return candidate;
                    }
                }
            }
        }
        // Hours are validated non-empty, so tomorrow's first instant is
        // always reachable above.
        after + Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_default_expression() {
        let schedule = Schedule::parse("0 0,6,12,18 * * *").unwrap();
        assert_eq!(schedule, Schedule { minute: 0, hours: vec![0, 6, 12, 18] });
    }

    #[test]
    fn test_parse_rejects_malformed_expressions() {
        assert!(Schedule::parse("0 0,6").is_err());
        assert!(Schedule::parse("* 0,6,12,18 * * *").is_err());
        assert!(Schedule::parse("0 0,25 * * *").is_err());
        assert!(Schedule::parse("0 0,6,12,18 1 * *").is_err());
        assert!(Schedule::parse("61 0 * * *").is_err());
    }

    #[test]
    fn test_next_fire_same_day() {
        let schedule = Schedule::parse("0 0,6,12,18 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2025, 10, 9, 1, 30, 0).unwrap();
        assert_eq!(
            schedule.next_fire(after),
            Utc.with_ymd_and_hms(2025, 10, 9, 6, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_fire_rolls_over_to_next_day() {
        let schedule = Schedule::parse("0 0,6,12,18 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2025, 10, 9, 19, 0, 0).unwrap();
        assert_eq!(
            schedule.next_fire(after),
            Utc.with_ymd_and_hms(2025, 10, 10, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_fire_skips_exact_instant() {
        let schedule = Schedule::parse("0 0,6,12,18 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2025, 10, 9, 6, 0, 0).unwrap();
        assert_eq!(
            schedule.next_fire(after),
            Utc.with_ymd_and_hms(2025, 10, 9, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_fire_with_custom_minute() {
        let schedule = Schedule::parse("30 3 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2025, 10, 9, 3, 29, 0).unwrap();
        assert_eq!(
            schedule.next_fire(after),
            Utc.with_ymd_and_hms(2025, 10, 9, 3, 30, 0).unwrap()
        );
    }
}
