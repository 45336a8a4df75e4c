//! Time-based triggers
//!
//! A [`TimeMatcher`] is either a five-field cron expression or a simple
//! `<days> HH:MM` rule. Both match only within the minute they name: there is
//! no catch-up for ticks missed while nothing was evaluating.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, ScalerError};

/// Days a simple time rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayClass {
    Daily,
    Weekdays,
    Weekends,
    On(Weekday),
}

impl DayClass {
    pub fn includes(&self, day: Weekday) -> bool {
        match self {
            DayClass::Daily => true,
            DayClass::Weekdays => !matches!(day, Weekday::Sat | Weekday::Sun),
            DayClass::Weekends => matches!(day, Weekday::Sat | Weekday::Sun),
            DayClass::On(d) => *d == day,
        }
    }
}

impl fmt::Display for DayClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayClass::Daily => f.write_str("daily"),
            DayClass::Weekdays => f.write_str("weekdays"),
            DayClass::Weekends => f.write_str("weekends"),
            DayClass::On(day) => write!(f, "{}", day_name(*day)),
        }
    }
}

impl FromStr for DayClass {
    type Err = ScalerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "daily" | "everyday" | "*" => Ok(DayClass::Daily),
            "weekdays" | "weekday" => Ok(DayClass::Weekdays),
            "weekends" | "weekend" => Ok(DayClass::Weekends),
            other => other
                .parse::<Weekday>()
                .map(DayClass::On)
                .map_err(|_| ScalerError::validation(format!("unknown day class '{}'", s))),
        }
    }
}

fn day_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// When a schedule entry fires
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeMatcher {
    Cron {
        expression: String,
        schedule: cron::Schedule,
    },
    At {
        days: DayClass,
        hour: u32,
        minute: u32,
    },
}

impl TimeMatcher {
    /// True when `now` falls inside the minute this matcher names
    pub fn matches<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        match self {
            TimeMatcher::At { days, hour, minute } => {
                days.includes(now.weekday()) && now.hour() == *hour && now.minute() == *minute
            }
            TimeMatcher::Cron { schedule, .. } => {
                // The previous fire time must be less than a minute old
                let window_start = now.clone() - chrono::Duration::seconds(60);
                schedule
                    .after(&window_start)
                    .next()
                    .map(|fire| fire <= *now)
                    .unwrap_or(false)
            }
        }
    }

    fn parse_cron(fields: &[&str]) -> Result<Self> {
        let expression = fields.join(" ");
        let day_of_week = normalize_day_of_week(fields[4])?;
        // The cron crate wants a leading seconds field
        let extended = format!(
            "0 {} {} {} {} {}",
            fields[0], fields[1], fields[2], fields[3], day_of_week
        );
        let schedule = cron::Schedule::from_str(&extended).map_err(|e| {
            ScalerError::validation(format!("invalid cron expression '{}': {}", expression, e))
        })?;
        Ok(TimeMatcher::Cron {
            expression,
            schedule,
        })
    }
}

impl FromStr for TimeMatcher {
    type Err = ScalerError;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        match fields.as_slice() {
            [time] => {
                let (hour, minute) = parse_hhmm(time)?;
                Ok(TimeMatcher::At {
                    days: DayClass::Daily,
                    hour,
                    minute,
                })
            }
            [days, time] => {
                let days = days.parse()?;
                let (hour, minute) = parse_hhmm(time)?;
                Ok(TimeMatcher::At { days, hour, minute })
            }
            f if f.len() == 5 => Self::parse_cron(f),
            _ => Err(ScalerError::validation(format!(
                "unrecognised schedule '{}' (expected 'HH:MM', '<days> HH:MM' or a 5-field cron expression)",
                s
            ))),
        }
    }
}

impl fmt::Display for TimeMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeMatcher::Cron { expression, .. } => f.write_str(expression),
            TimeMatcher::At { days, hour, minute } => {
                write!(f, "{} {:02}:{:02}", days, hour, minute)
            }
        }
    }
}

impl TryFrom<String> for TimeMatcher {
    type Error = ScalerError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeMatcher> for String {
    fn from(matcher: TimeMatcher) -> Self {
        matcher.to_string()
    }
}

fn parse_hhmm(s: &str) -> Result<(u32, u32)> {
    let invalid = || ScalerError::validation(format!("invalid time '{}' (expected HH:MM)", s));
    let (h, m) = s.split_once(':').ok_or_else(invalid)?;
    let hour: u32 = h.parse().map_err(|_| invalid())?;
    let minute: u32 = m.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

/// Rewrite Unix day-of-week numbers (0 and 7 are Sunday) as names,
/// which the cron crate reads unambiguously.
fn normalize_day_of_week(field: &str) -> Result<String> {
    const NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

    let mut parts = Vec::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (part, None),
        };
        let mut bounds = Vec::new();
        for bound in range.split('-') {
            match bound.parse::<usize>() {
                Ok(n) if n < NAMES.len() => bounds.push(NAMES[n].to_string()),
                Ok(n) => {
                    return Err(ScalerError::validation(format!(
                        "day of week {} out of range 0-7",
                        n
                    )))
                }
                Err(_) => bounds.push(bound.to_string()),
            }
        }
        let mut rewritten = bounds.join("-");
        if let Some(step) = step {
            rewritten.push('/');
            rewritten.push_str(step);
        }
        parts.push(rewritten);
    }
    Ok(parts.join(","))
}

/// One schedule rule and the replica count it requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub at: TimeMatcher,
    pub replicas: u32,
}

impl ScheduleEntry {
    pub fn new(at: TimeMatcher, replicas: u32) -> Self {
        Self { at, replicas }
    }
}

/// First entry, in order, whose matcher fires at `now`
pub fn first_match<'a, Tz: TimeZone>(
    entries: &'a [ScheduleEntry],
    now: &DateTime<Tz>,
) -> Option<&'a ScheduleEntry> {
    entries.iter().find(|entry| entry.at.matches(now))
}

/// Parse `<schedule>,<replicas>` lines; `#` comments and blank lines are skipped
pub fn parse_schedule(content: &str) -> Result<Vec<ScheduleEntry>> {
    let mut entries = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (at, replicas) = line.rsplit_once(',').ok_or_else(|| {
            ScalerError::validation(format!(
                "schedule line {}: expected '<schedule>,<replicas>'",
                idx + 1
            ))
        })?;
        let replicas: u32 = replicas.trim().parse().map_err(|_| {
            ScalerError::validation(format!(
                "schedule line {}: invalid replica count '{}'",
                idx + 1,
                replicas.trim()
            ))
        })?;
        let at: TimeMatcher = at.trim().parse().map_err(|e| {
            ScalerError::validation(format!("schedule line {}: {}", idx + 1, e))
        })?;

        entries.push(ScheduleEntry::new(at, replicas));
    }

    Ok(entries)
}

/// Read and parse a schedule file
pub fn load_schedule_file(path: &Path) -> Result<Vec<ScheduleEntry>> {
    let content = std::fs::read_to_string(path)?;
    parse_schedule(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    // 2024-01-03 is a Wednesday, 2024-01-06 a Saturday
    #[test]
    fn test_weekdays_rule() {
        let matcher: TimeMatcher = "weekdays 08:00".parse().unwrap();
        assert!(matcher.matches(&at(2024, 1, 3, 8, 0, 0)));
        assert!(matcher.matches(&at(2024, 1, 3, 8, 0, 45)));
        assert!(!matcher.matches(&at(2024, 1, 6, 8, 0, 0)));
        assert!(!matcher.matches(&at(2024, 1, 3, 8, 1, 0)));
    }

    #[test]
    fn test_weekends_and_named_day() {
        let weekend: TimeMatcher = "weekends 22:30".parse().unwrap();
        assert!(weekend.matches(&at(2024, 1, 6, 22, 30, 0)));
        assert!(!weekend.matches(&at(2024, 1, 3, 22, 30, 0)));

        let friday: TimeMatcher = "Friday 17:45".parse().unwrap();
        assert!(friday.matches(&at(2024, 1, 5, 17, 45, 10)));
        assert!(!friday.matches(&at(2024, 1, 4, 17, 45, 10)));
    }

    #[test]
    fn test_bare_time_is_daily() {
        let matcher: TimeMatcher = "23:59".parse().unwrap();
        assert!(matcher.matches(&at(2024, 1, 6, 23, 59, 0)));
        assert_eq!(matcher.to_string(), "daily 23:59");
    }

    #[test]
    fn test_invalid_times_rejected() {
        assert!("weekdays 24:00".parse::<TimeMatcher>().is_err());
        assert!("weekdays 8".parse::<TimeMatcher>().is_err());
        assert!("someday 08:00".parse::<TimeMatcher>().is_err());
        assert!("a b c".parse::<TimeMatcher>().is_err());
    }

    #[test]
    fn test_cron_matches_within_minute_only() {
        let matcher: TimeMatcher = "0 8 * * 1-5".parse().unwrap();
        assert!(matcher.matches(&at(2024, 1, 3, 8, 0, 0)));
        assert!(matcher.matches(&at(2024, 1, 3, 8, 0, 59)));
        assert!(!matcher.matches(&at(2024, 1, 3, 8, 1, 0)));
        assert!(!matcher.matches(&at(2024, 1, 3, 7, 59, 59)));
        // Saturday
        assert!(!matcher.matches(&at(2024, 1, 6, 8, 0, 0)));
    }

    #[test]
    fn test_cron_sunday_as_zero_and_seven() {
        let zero: TimeMatcher = "30 6 * * 0".parse().unwrap();
        let seven: TimeMatcher = "30 6 * * 7".parse().unwrap();
        // 2024-01-07 is a Sunday
        assert!(zero.matches(&at(2024, 1, 7, 6, 30, 0)));
        assert!(seven.matches(&at(2024, 1, 7, 6, 30, 0)));
        assert!(!zero.matches(&at(2024, 1, 8, 6, 30, 0)));
    }

    #[test]
    fn test_cron_step_minutes() {
        let matcher: TimeMatcher = "*/15 * * * *".parse().unwrap();
        assert!(matcher.matches(&at(2024, 1, 3, 10, 45, 20)));
        assert!(!matcher.matches(&at(2024, 1, 3, 10, 46, 0)));
    }

    #[test]
    fn test_invalid_cron_rejected() {
        assert!("99 8 * * *".parse::<TimeMatcher>().is_err());
        assert!("0 8 * * 9".parse::<TimeMatcher>().is_err());
    }

    #[test]
    fn test_first_match_wins() {
        let entries = vec![
            ScheduleEntry::new("weekdays 08:00".parse().unwrap(), 5),
            ScheduleEntry::new("daily 08:00".parse().unwrap(), 2),
        ];
        let wednesday = at(2024, 1, 3, 8, 0, 0);
        let saturday = at(2024, 1, 6, 8, 0, 0);
        assert_eq!(first_match(&entries, &wednesday).unwrap().replicas, 5);
        assert_eq!(first_match(&entries, &saturday).unwrap().replicas, 2);
        assert!(first_match(&entries, &at(2024, 1, 6, 9, 0, 0)).is_none());
    }

    #[test]
    fn test_parse_schedule_file() {
        let content = "# business hours\n\
                       weekdays 08:00,6\n\
                       \n\
                       weekdays 18:00, 2\n\
                       0 0 * * 0,1\n";
        let entries = parse_schedule(content).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].replicas, 2);
        assert_eq!(entries[2].at.to_string(), "0 0 * * 0");
    }

    #[test]
    fn test_parse_schedule_reports_line() {
        let err = parse_schedule("weekdays 08:00,6\nweekdays 09:00,many\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_load_schedule_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.txt");
        std::fs::write(&path, "weekends 10:00,1\n").unwrap();
        let entries = load_schedule_file(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].at.to_string(), "weekends 10:00");
    }

    #[test]
    fn test_matcher_serde_roundtrip_as_string() {
        let entry: ScheduleEntry =
            serde_json::from_str(r#"{"at": "weekdays 08:00", "replicas": 4}"#).unwrap();
        assert_eq!(entry.replicas, 4);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"weekdays 08:00\""));
    }
}
