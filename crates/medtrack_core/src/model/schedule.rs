//! Dose schedule primitives: time windows and weekdays.
//!
//! # Responsibility
//! - Define the fixed set of named day segments and their bounds.
//! - Classify a wall-clock moment against a window (not started/open/closed).
//!
//! # Invariants
//! - Windows are ordered `morning < afternoon < evening < night` and never
//!   overlap.
//! - The last window (`night`) always ends at end-of-day (minute 1440), so no
//!   wraparound across midnight exists.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Minute index one past the last minute of a day.
pub const END_OF_DAY_MINUTE: u32 = 24 * 60;

static CLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:([01]\d|2[0-3]):([0-5]\d)|(24):(00))$").expect("valid clock regex"));

/// Named day segment a medicine is scheduled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeWindow {
    /// All windows in day order.
    pub const ALL: [TimeWindow; 4] = [
        TimeWindow::Morning,
        TimeWindow::Afternoon,
        TimeWindow::Evening,
        TimeWindow::Night,
    ];

    /// Storage and wire code.
    pub fn code(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Night => "night",
        }
    }

    /// Parses a window code, case-insensitively.
    pub fn from_code(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "morning" => Some(Self::Morning),
            "afternoon" => Some(Self::Afternoon),
            "evening" => Some(Self::Evening),
            "night" => Some(Self::Night),
            _ => None,
        }
    }

    /// Zero-based position in day order.
    pub fn position(self) -> usize {
        match self {
            Self::Morning => 0,
            Self::Afternoon => 1,
            Self::Evening => 2,
            Self::Night => 3,
        }
    }
}

impl Display for TimeWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Half-open `[start_minute, end_minute)` interval in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub start_minute: u32,
    pub end_minute: u32,
}

impl WindowBounds {
    pub fn new(start_minute: u32, end_minute: u32) -> Self {
        Self {
            start_minute,
            end_minute,
        }
    }

    /// Start as a time of day.
    pub fn start_time(&self) -> NaiveTime {
        NaiveTime::from_num_seconds_from_midnight_opt(self.start_minute * 60, 0)
            .unwrap_or(NaiveTime::MIN)
    }

    /// Phase of this window for a dose on `date`, observed at `now`.
    ///
    /// Past dates are always closed, future dates never started.
    pub fn phase_at(&self, date: NaiveDate, now: NaiveDateTime) -> WindowPhase {
        let today = now.date();
        if date < today {
            return WindowPhase::Closed;
        }
        if date > today {
            return WindowPhase::NotStarted;
        }

        let minute = minute_of_day(now.time());
        if minute < self.start_minute {
            WindowPhase::NotStarted
        } else if minute < self.end_minute {
            WindowPhase::Open
        } else {
            WindowPhase::Closed
        }
    }
}

/// Where a wall-clock moment falls relative to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    NotStarted,
    Open,
    Closed,
}

/// The four configured windows, indexed by [`TimeWindow::position`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindowTable {
    bounds: [WindowBounds; 4],
}

impl Default for TimeWindowTable {
    fn default() -> Self {
        Self {
            bounds: [
                WindowBounds::new(6 * 60, 12 * 60),
                WindowBounds::new(12 * 60, 17 * 60),
                WindowBounds::new(17 * 60, 21 * 60),
                WindowBounds::new(21 * 60, END_OF_DAY_MINUTE),
            ],
        }
    }
}

impl TimeWindowTable {
    /// Builds and validates a table from per-window bounds in day order.
    pub fn try_new(bounds: [WindowBounds; 4]) -> Result<Self, ScheduleError> {
        let table = Self { bounds };
        table.validate()?;
        Ok(table)
    }

    pub fn bounds(&self, window: TimeWindow) -> WindowBounds {
        self.bounds[window.position()]
    }

    /// Iterates windows in day order with their bounds.
    pub fn iter(&self) -> impl Iterator<Item = (TimeWindow, WindowBounds)> + '_ {
        TimeWindow::ALL
            .into_iter()
            .map(move |window| (window, self.bounds(window)))
    }

    /// Checks ordering, non-overlap and the end-of-day rule.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        let mut previous_end = 0;
        for (window, bounds) in self.iter() {
            if bounds.start_minute >= bounds.end_minute || bounds.end_minute > END_OF_DAY_MINUTE {
                return Err(ScheduleError::EmptyWindow(window));
            }
            if bounds.start_minute < previous_end {
                return Err(ScheduleError::Overlap(window));
            }
            previous_end = bounds.end_minute;
        }

        if self.bounds(TimeWindow::Night).end_minute != END_OF_DAY_MINUTE {
            return Err(ScheduleError::LastWindowMustEndAtMidnight);
        }
        Ok(())
    }
}

/// Invalid time-window configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// `start >= end`, or end past midnight.
    EmptyWindow(TimeWindow),
    /// Window starts before the previous one ends.
    Overlap(TimeWindow),
    LastWindowMustEndAtMidnight,
    /// Clock text is not `HH:MM` (or `24:00`).
    InvalidClock(String),
}

impl Display for ScheduleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyWindow(window) => {
                write!(f, "window `{window}` must start before it ends")
            }
            Self::Overlap(window) => {
                write!(f, "window `{window}` overlaps the previous window")
            }
            Self::LastWindowMustEndAtMidnight => write!(f, "window `night` must end at 24:00"),
            Self::InvalidClock(value) => {
                write!(f, "invalid clock value `{value}`; expected HH:MM")
            }
        }
    }
}

impl Error for ScheduleError {}

/// Minutes since midnight for a time of day.
pub fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Parses `HH:MM` (00:00..=23:59, plus `24:00`) into minutes since midnight.
pub fn parse_clock(value: &str) -> Result<u32, ScheduleError> {
    let trimmed = value.trim();
    let caps = CLOCK_RE
        .captures(trimmed)
        .ok_or_else(|| ScheduleError::InvalidClock(trimmed.to_string()))?;

    let (hours, minutes) = match (caps.get(1), caps.get(2)) {
        (Some(h), Some(m)) => (h.as_str(), m.as_str()),
        _ => ("24", "00"),
    };
    let hours: u32 = hours
        .parse()
        .map_err(|_| ScheduleError::InvalidClock(trimmed.to_string()))?;
    let minutes: u32 = minutes
        .parse()
        .map_err(|_| ScheduleError::InvalidClock(trimmed.to_string()))?;
    Ok(hours * 60 + minutes)
}

/// Formats minutes since midnight as `HH:MM`.
pub fn format_clock(minute: u32) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// Three-letter lowercase storage code for a weekday.
pub fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

/// Parses a weekday from a short or long English name, case-insensitively.
pub fn parse_weekday(value: &str) -> Option<Weekday> {
    match value.trim().to_ascii_lowercase().as_str() {
        "mon" | "monday" => Some(Weekday::Mon),
        "tue" | "tues" | "tuesday" => Some(Weekday::Tue),
        "wed" | "wednesday" => Some(Weekday::Wed),
        "thu" | "thur" | "thurs" | "thursday" => Some(Weekday::Thu),
        "fri" | "friday" => Some(Weekday::Fri),
        "sat" | "saturday" => Some(Weekday::Sat),
        "sun" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Sorts weekdays Monday-first and removes duplicates.
pub fn normalize_weekdays(days: &mut Vec<Weekday>) {
    days.sort_by_key(|day| day.num_days_from_monday());
    days.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn default_table_is_valid_and_ends_at_midnight() {
        let table = TimeWindowTable::default();
        table.validate().expect("defaults should validate");
        assert_eq!(
            table.bounds(TimeWindow::Night).end_minute,
            END_OF_DAY_MINUTE
        );
    }

    #[test]
    fn overlapping_windows_are_rejected() {
        let result = TimeWindowTable::try_new([
            WindowBounds::new(360, 780),
            WindowBounds::new(720, 1020),
            WindowBounds::new(1020, 1260),
            WindowBounds::new(1260, 1440),
        ]);
        assert_eq!(result, Err(ScheduleError::Overlap(TimeWindow::Afternoon)));
    }

    #[test]
    fn night_must_end_at_end_of_day() {
        let result = TimeWindowTable::try_new([
            WindowBounds::new(360, 720),
            WindowBounds::new(720, 1020),
            WindowBounds::new(1020, 1260),
            WindowBounds::new(1260, 1380),
        ]);
        assert_eq!(result, Err(ScheduleError::LastWindowMustEndAtMidnight));
    }

    #[test]
    fn phase_follows_half_open_bounds() {
        let morning = WindowBounds::new(360, 720);
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert_eq!(morning.phase_at(day, at("2026-03-02", "05:59")), WindowPhase::NotStarted);
        assert_eq!(morning.phase_at(day, at("2026-03-02", "06:00")), WindowPhase::Open);
        assert_eq!(morning.phase_at(day, at("2026-03-02", "11:59")), WindowPhase::Open);
        assert_eq!(morning.phase_at(day, at("2026-03-02", "12:00")), WindowPhase::Closed);
    }

    #[test]
    fn phase_uses_calendar_date_for_other_days() {
        let night = WindowBounds::new(1260, END_OF_DAY_MINUTE);
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert_eq!(night.phase_at(day, at("2026-03-02", "23:59")), WindowPhase::Open);
        assert_eq!(night.phase_at(day, at("2026-03-03", "00:00")), WindowPhase::Closed);
        assert_eq!(night.phase_at(day, at("2026-03-01", "23:00")), WindowPhase::NotStarted);
    }

    #[test]
    fn parse_clock_accepts_midnight_end_and_rejects_garbage() {
        assert_eq!(parse_clock("06:30"), Ok(390));
        assert_eq!(parse_clock("24:00"), Ok(END_OF_DAY_MINUTE));
        assert!(parse_clock("24:01").is_err());
        assert!(parse_clock("6:30").is_err());
        assert!(parse_clock("noon").is_err());
        assert_eq!(format_clock(390), "06:30");
    }

    #[test]
    fn weekday_parsing_accepts_short_and_long_names() {
        assert_eq!(parse_weekday("Mon"), Some(Weekday::Mon));
        assert_eq!(parse_weekday("thursday"), Some(Weekday::Thu));
        assert_eq!(parse_weekday("funday"), None);

        let mut days = vec![Weekday::Sun, Weekday::Mon, Weekday::Sun];
        normalize_weekdays(&mut days);
        assert_eq!(days, vec![Weekday::Mon, Weekday::Sun]);
    }
}
