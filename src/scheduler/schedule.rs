//! Cleanup schedule parsing.
//!
//! Only the three cron shapes the daemon is ever configured with are
//! accepted: `M */N * * *` (every N hours), `M H * * *` (daily) and
//! `M * * * *` (hourly). Anything else is rejected up front instead of
//! firing at surprising times.
//!
//! All schedule arithmetic is in UTC. Like cron, the `*/N` hour step
//! restarts at midnight, so `30 */7 * * *` fires at 00:30, 07:30, 14:30,
//! 21:30 and then 00:30 again.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static EVERY_N_HOURS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2}) \*/(\d{1,2}) \* \* \*$").expect("valid regex"));
static DAILY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2}) (\d{1,2}) \* \* \*$").expect("valid regex"));
static HOURLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2}) \* \* \* \*$").expect("valid regex"));

const MINUTE_SECS: i64 = 60;
const HOUR_SECS: i64 = 3_600;
const DAY_SECS: i64 = 86_400;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("unsupported cron expression: {0}")]
    Unsupported(String),

    #[error("cron field out of range in '{expression}': {field} = {value}")]
    OutOfRange {
        expression: String,
        field: &'static str,
        value: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScheduleKind {
    EveryHours { minute: u32, step: u32 },
    Daily { minute: u32, hour: u32 },
    Hourly { minute: u32 },
}

/// A validated cleanup schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSpec {
    expression: String,
    kind: ScheduleKind,
}

impl ScheduleSpec {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let expr = expression.trim();

        let kind = if let Some(caps) = EVERY_N_HOURS.captures(expr) {
            let minute = parse_field(expr, "minute", &caps[1], 59)?;
            let step = parse_field(expr, "hour step", &caps[2], 23)?;
            if step == 0 {
                return Err(ScheduleError::OutOfRange {
                    expression: expr.to_string(),
                    field: "hour step",
                    value: 0,
                });
            }
            ScheduleKind::EveryHours { minute, step }
        } else if let Some(caps) = DAILY.captures(expr) {
            let minute = parse_field(expr, "minute", &caps[1], 59)?;
            let hour = parse_field(expr, "hour", &caps[2], 23)?;
            ScheduleKind::Daily { minute, hour }
        } else if let Some(caps) = HOURLY.captures(expr) {
            let minute = parse_field(expr, "minute", &caps[1], 59)?;
            ScheduleKind::Hourly { minute }
        } else {
            return Err(ScheduleError::Unsupported(expression.to_string()));
        };

        Ok(Self {
            expression: expr.to_string(),
            kind,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `from`.
    pub fn next_fire_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let ts = from.timestamp();
        let next_ts = match self.kind {
            ScheduleKind::Hourly { minute } => {
                next_in_cycle(ts, HOUR_SECS, i64::from(minute) * MINUTE_SECS)
            }
            ScheduleKind::Daily { minute, hour } => next_in_cycle(
                ts,
                DAY_SECS,
                i64::from(hour) * HOUR_SECS + i64::from(minute) * MINUTE_SECS,
            ),
            ScheduleKind::EveryHours { minute, step } => {
                next_every_hours(ts, i64::from(minute), i64::from(step))
            }
        };

        // next_ts is at most ~25h past a real clock reading, always in range.
        DateTime::from_timestamp(next_ts, 0).unwrap_or_else(|| from + Duration::hours(1))
    }
}

fn parse_field(
    expression: &str,
    field: &'static str,
    raw: &str,
    max: u32,
) -> Result<u32, ScheduleError> {
    let value: u32 = raw
        .parse()
        .map_err(|_| ScheduleError::Unsupported(expression.to_string()))?;
    if value > max {
        return Err(ScheduleError::OutOfRange {
            expression: expression.to_string(),
            field,
            value,
        });
    }
    Ok(value)
}

/// Smallest `t > ts` with `t ≡ offset (mod period)`. The unix epoch fell on
/// a UTC midnight, so hour and day cycles anchor correctly.
fn next_in_cycle(ts: i64, period: i64, offset: i64) -> i64 {
    let rem = (ts - offset).rem_euclid(period);
    ts + (period - rem)
}

fn next_every_hours(ts: i64, minute: i64, step: i64) -> i64 {
    let day_start = ts - ts.rem_euclid(DAY_SECS);
    let mut hour = 0;
    while hour < 24 {
        let candidate = day_start + hour * HOUR_SECS + minute * MINUTE_SECS;
        if candidate > ts {
            return candidate;
        }
        hour += step;
    }
    // Today's slots are exhausted; the cycle restarts at hour zero tomorrow.
    day_start + DAY_SECS + minute * MINUTE_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, minute, second)
            .unwrap()
    }

    #[test]
    fn test_parse_every_n_hours() {
        let spec = ScheduleSpec::parse("0 */6 * * *").unwrap();
        assert_eq!(spec.expression(), "0 */6 * * *");
    }

    #[test]
    fn test_parse_daily_and_hourly() {
        assert!(ScheduleSpec::parse("30 2 * * *").is_ok());
        assert!(ScheduleSpec::parse("15 * * * *").is_ok());
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let spec = ScheduleSpec::parse("  0 */6 * * *  ").unwrap();
        assert_eq!(spec.expression(), "0 */6 * * *");
    }

    #[test]
    fn test_parse_rejects_unsupported_shapes() {
        for expr in [
            "* * * * *",
            "*/5 * * * *",
            "0 9-17 * * *",
            "0 0 * * 0",
            "0 0 1 * *",
            "0 0 */6 * * *",
            "every six hours",
            "",
        ] {
            assert!(
                matches!(ScheduleSpec::parse(expr), Err(ScheduleError::Unsupported(_))),
                "expected {expr:?} to be unsupported"
            );
        }
    }

    #[test]
    fn test_parse_rejects_out_of_range_fields() {
        assert!(matches!(
            ScheduleSpec::parse("60 */6 * * *"),
            Err(ScheduleError::OutOfRange { field: "minute", .. })
        ));
        assert!(matches!(
            ScheduleSpec::parse("0 */0 * * *"),
            Err(ScheduleError::OutOfRange { field: "hour step", .. })
        ));
        assert!(matches!(
            ScheduleSpec::parse("0 24 * * *"),
            Err(ScheduleError::OutOfRange { field: "hour", .. })
        ));
        assert!(matches!(
            ScheduleSpec::parse("99 * * * *"),
            Err(ScheduleError::OutOfRange { field: "minute", .. })
        ));
    }

    #[test]
    fn test_hourly_next_fire() {
        let spec = ScheduleSpec::parse("15 * * * *").unwrap();
        assert_eq!(spec.next_fire_after(at(10, 20, 0)), at(11, 15, 0));
        assert_eq!(spec.next_fire_after(at(10, 14, 59)), at(10, 15, 0));
    }

    #[test]
    fn test_hourly_exact_fire_time_moves_to_next_hour() {
        let spec = ScheduleSpec::parse("15 * * * *").unwrap();
        assert_eq!(spec.next_fire_after(at(10, 15, 0)), at(11, 15, 0));
    }

    #[test]
    fn test_daily_next_fire() {
        let spec = ScheduleSpec::parse("30 2 * * *").unwrap();
        assert_eq!(spec.next_fire_after(at(1, 0, 0)), at(2, 30, 0));

        let next = spec.next_fire_after(at(3, 0, 0));
        assert_eq!(
            next,
            Utc.with_ymd_and_hms(2026, 3, 11, 2, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_every_six_hours_fires_on_the_grid() {
        let spec = ScheduleSpec::parse("0 */6 * * *").unwrap();
        assert_eq!(spec.next_fire_after(at(13, 30, 0)), at(18, 0, 0));
        assert_eq!(spec.next_fire_after(at(0, 0, 0)), at(6, 0, 0));

        let next = spec.next_fire_after(at(23, 59, 0));
        assert_eq!(
            next,
            Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_hour_step_restarts_at_midnight() {
        // Slots for */7 are 00:30, 07:30, 14:30, 21:30; afterwards the next
        // day starts over at 00:30 rather than continuing 28:30.
        let spec = ScheduleSpec::parse("30 */7 * * *").unwrap();
        assert_eq!(spec.next_fire_after(at(15, 0, 0)), at(21, 30, 0));

        let next = spec.next_fire_after(at(22, 0, 0));
        assert_eq!(
            next,
            Utc.with_ymd_and_hms(2026, 3, 11, 0, 30, 0).unwrap()
        );
    }
}
