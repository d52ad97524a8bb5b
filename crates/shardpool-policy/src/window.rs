//! Weekday/hour windows for scaling overrides.

use chrono::{DateTime, Datelike, NaiveTime, Utc};
use thiserror::Error;

/// Errors from parsing a window out of its config strings.
#[derive(Debug, Error)]
pub enum WindowParseError {
    #[error("invalid weekday {0:?}: expected a number 0-6 (0 = Sunday)")]
    Day(String),

    #[error("empty day list")]
    NoDays,

    #[error("invalid hour range {0:?}: expected \"HH:MM:SS-HH:MM:SS\"")]
    HourRange(String),

    #[error("invalid time {0:?} in hour range")]
    Time(String),
}

/// A set of weekdays with an optional UTC time-of-day range.
///
/// The hour range is half-open: `start <= t < end`. No hour range
/// means the window covers the whole day on matching weekdays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    /// Weekday membership, indexed by days-from-Sunday (0 = Sunday).
    days: [bool; 7],
    hours: Option<(NaiveTime, NaiveTime)>,
}

impl TimeWindow {
    /// Parse a window from the config representation: comma-separated
    /// weekday numbers and an optional `"HH:MM:SS-HH:MM:SS"` range.
    pub fn parse(days: &str, hours: Option<&str>) -> Result<TimeWindow, WindowParseError> {
        let mut day_set = [false; 7];
        let mut any = false;
        for part in days.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let n: usize = part
                .parse()
                .ok()
                .filter(|n| *n <= 6)
                .ok_or_else(|| WindowParseError::Day(part.to_string()))?;
            day_set[n] = true;
            any = true;
        }
        if !any {
            return Err(WindowParseError::NoDays);
        }

        let hours = match hours {
            None => None,
            Some(raw) => {
                let (start, end) = raw
                    .split_once('-')
                    .ok_or_else(|| WindowParseError::HourRange(raw.to_string()))?;
                Some((parse_time(start.trim())?, parse_time(end.trim())?))
            }
        };

        Ok(TimeWindow {
            days: day_set,
            hours,
        })
    }

    /// Whether `now` falls inside this window.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let weekday = now.weekday().num_days_from_sunday() as usize;
        if !self.days[weekday] {
            return false;
        }
        match self.hours {
            None => true,
            Some((start, end)) => {
                let t = now.time();
                start <= t && t < end
            }
        }
    }
}

fn parse_time(s: &str) -> Result<NaiveTime, WindowParseError> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| WindowParseError::Time(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn weekday_only_window_covers_whole_day() {
        // 2024-06-01 is a Saturday (weekday 6).
        let w = TimeWindow::parse("6", None).unwrap();
        assert!(w.contains(utc(2024, 6, 1, 0, 0, 0)));
        assert!(w.contains(utc(2024, 6, 1, 23, 59, 59)));
        // Sunday does not match.
        assert!(!w.contains(utc(2024, 6, 2, 12, 0, 0)));
    }

    #[test]
    fn hour_range_is_half_open() {
        let w = TimeWindow::parse("6", Some("04:00:00-06:00:00")).unwrap();
        assert!(w.contains(utc(2024, 6, 1, 4, 0, 0))); // start inclusive
        assert!(w.contains(utc(2024, 6, 1, 5, 59, 59)));
        assert!(!w.contains(utc(2024, 6, 1, 6, 0, 0))); // end exclusive
        assert!(!w.contains(utc(2024, 6, 1, 3, 59, 59)));
    }

    #[test]
    fn subsecond_timestamps_respect_the_boundaries() {
        use chrono::Timelike;

        let w = TimeWindow::parse("6", Some("04:00:00-06:00:00")).unwrap();
        let just_inside = utc(2024, 6, 1, 5, 59, 59)
            .with_nanosecond(999_000_000)
            .unwrap();
        assert!(w.contains(just_inside));
        let past_end = utc(2024, 6, 1, 6, 0, 0).with_nanosecond(1).unwrap();
        assert!(!w.contains(past_end));
    }

    #[test]
    fn multiple_days_parse() {
        let w = TimeWindow::parse("5, 6", None).unwrap();
        assert!(w.contains(utc(2024, 5, 31, 1, 0, 0))); // Friday
        assert!(w.contains(utc(2024, 6, 1, 1, 0, 0))); // Saturday
        assert!(!w.contains(utc(2024, 6, 3, 1, 0, 0))); // Monday
    }

    #[test]
    fn single_digit_hours_accepted() {
        let w = TimeWindow::parse("0", Some("4:00:00-6:00:00")).unwrap();
        assert!(w.contains(utc(2024, 6, 2, 5, 0, 0))); // Sunday
    }

    #[test]
    fn malformed_inputs_error() {
        assert!(matches!(
            TimeWindow::parse("7", None),
            Err(WindowParseError::Day(_))
        ));
        assert!(matches!(
            TimeWindow::parse("monday", None),
            Err(WindowParseError::Day(_))
        ));
        assert!(matches!(
            TimeWindow::parse("", None),
            Err(WindowParseError::NoDays)
        ));
        assert!(matches!(
            TimeWindow::parse("1", Some("04:00:00")),
            Err(WindowParseError::HourRange(_))
        ));
        assert!(matches!(
            TimeWindow::parse("1", Some("04:00:00-late")),
            Err(WindowParseError::Time(_))
        ));
    }
}
