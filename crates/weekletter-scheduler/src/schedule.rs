use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{Result, SchedulerError};

/// Parse a 6-field cron expression (seconds first).
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    Schedule::from_str(expression).map_err(|e| SchedulerError::InvalidSchedule {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// First occurrence of `expression` strictly after `from`, evaluated in UTC.
pub fn next_after(expression: &str, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
    parse_cron(expression)?
        .after(&from)
        .next()
        .ok_or_else(|| SchedulerError::InvalidSchedule {
            expression: expression.to_string(),
            reason: "no future occurrence".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, h, m, s).unwrap()
    }

    #[test]
    fn hourly_rolls_to_next_hour() {
        assert_eq!(next_after("0 0 * * * *", at(9, 30, 0)).unwrap(), at(10, 0, 0));
    }

    #[test]
    fn occurrence_is_strictly_after_from() {
        assert_eq!(next_after("0 0 * * * *", at(10, 0, 0)).unwrap(), at(11, 0, 0));
    }

    #[test]
    fn every_minute() {
        assert_eq!(next_after("0 * * * * *", at(10, 0, 30)).unwrap(), at(10, 1, 0));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = next_after("every tuesday", at(10, 0, 0)).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));
    }
}
