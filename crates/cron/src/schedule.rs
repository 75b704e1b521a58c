//! Next-run computation for job schedules.

use {
    chrono::{DateTime, Utc},
    chrono_tz::Tz,
    cron::Schedule,
};

use crate::{Error, Result, types::JobSchedule};

/// Parse a cron expression. The `cron` crate wants seconds (and optionally a
/// year); plain 5-field expressions get `0` seconds and `*` year added.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    expr.parse::<Schedule>()
        .or_else(|_| format!("0 {expr} *").parse::<Schedule>())
        .map_err(|e| Error::InvalidExpression {
            expr: expr.to_string(),
            reason: e.to_string(),
        })
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::unknown_timezone(name))
}

/// Reject expressions or timezones that can never produce a run.
pub fn validate_schedule(schedule: &JobSchedule) -> Result<()> {
    match schedule {
        JobSchedule::Every { every_ms: 0 } => Err(Error::message("every_ms must be > 0")),
        JobSchedule::Every { .. } => Ok(()),
        JobSchedule::Cron { expr, tz } => {
            parse_cron(expr)?;
            if let Some(tz) = tz {
                parse_timezone(tz)?;
            }
            Ok(())
        },
    }
}

/// Compute the next run time (epoch millis) strictly after `now_ms`.
///
/// Returns `None` if the expression has no future occurrence.
pub fn compute_next_run(schedule: &JobSchedule, now_ms: u64) -> Result<Option<u64>> {
    match schedule {
        JobSchedule::Every { every_ms } => {
            if *every_ms == 0 {
                return Err(Error::message("every_ms must be > 0"));
            }
            Ok(Some(now_ms + every_ms))
        },
        JobSchedule::Cron { expr, tz } => {
            let schedule = parse_cron(expr)?;
            let now = i64::try_from(now_ms)
                .ok()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .ok_or_else(|| Error::message(format!("timestamp out of range: {now_ms}")))?;

            let next = match tz {
                Some(name) => {
                    let tz = parse_timezone(name)?;
                    schedule
                        .after(&now.with_timezone(&tz))
                        .next()
                        .map(|dt| dt.timestamp_millis())
                },
                None => schedule.after(&now).next().map(|dt| dt.timestamp_millis()),
            };

            Ok(next.and_then(|ms| u64::try_from(ms).ok()))
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono::TimeZone, rstest::rstest};

    fn ms(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> u64 {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .timestamp_millis() as u64
    }

    fn cron(expr: &str, tz: Option<&str>) -> JobSchedule {
        JobSchedule::Cron {
            expr: expr.into(),
            tz: tz.map(str::to_string),
        }
    }

    #[test]
    fn every_is_relative_to_now() {
        let s = JobSchedule::Every { every_ms: 60_000 };
        assert_eq!(compute_next_run(&s, 100_000).unwrap(), Some(160_000));
        assert!(compute_next_run(&JobSchedule::Every { every_ms: 0 }, 0).is_err());
    }

    #[rstest]
    // Every minute.
    #[case("* * * * *", None, ms(2025, 6, 15, 10, 30), ms(2025, 6, 15, 10, 31))]
    // Every six hours on the hour.
    #[case("0 */6 * * *", None, ms(2025, 6, 15, 7, 0), ms(2025, 6, 15, 12, 0))]
    // Mondays at noon; 2025-06-15 is a Sunday.
    #[case("0 12 * * Mon", None, ms(2025, 6, 15, 10, 0), ms(2025, 6, 16, 12, 0))]
    // Daily at 17:00 in Chicago (CDT, UTC-5).
    #[case("0 17 * * *", Some("America/Chicago"), ms(2025, 6, 15, 10, 0), ms(2025, 6, 15, 22, 0))]
    fn cron_next_run(
        #[case] expr: &str,
        #[case] tz: Option<&str>,
        #[case] now: u64,
        #[case] expected: u64,
    ) {
        assert_eq!(compute_next_run(&cron(expr, tz), now).unwrap(), Some(expected));
    }

    #[test]
    fn next_run_is_strictly_after_now() {
        let now = ms(2025, 6, 15, 12, 0);
        let next = compute_next_run(&cron("0 12 * * *", None), now)
            .unwrap()
            .unwrap();
        assert_eq!(next, ms(2025, 6, 16, 12, 0));
    }

    #[test]
    fn validation_rejects_bad_input() {
        assert!(validate_schedule(&cron("not a cron", None)).is_err());
        assert!(matches!(
            validate_schedule(&cron("* * * * *", Some("Mars/Olympus"))),
            Err(Error::UnknownTimezone { .. })
        ));
        assert!(validate_schedule(&cron("0 12 * * Mon", Some("UTC"))).is_ok());
    }
}
