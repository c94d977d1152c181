//! Shift schedules and the department timetable

use crate::domain::types::ScheduleId;
use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer};

/// Concrete begin/end instants of a shift
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftWindow {
    pub begin: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ShiftWindow {
    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.begin <= at && at < self.end
    }

    /// Strictly inside the window, excluding both edges
    pub fn strictly_contains(&self, at: NaiveDateTime) -> bool {
        self.begin < at && at < self.end
    }
}

/// A recurring daily shift
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    #[serde(deserialize_with = "deserialize_hhmm")]
    pub begin: NaiveTime,
    #[serde(deserialize_with = "deserialize_hhmm")]
    pub end: NaiveTime,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

fn deserialize_hhmm<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    NaiveTime::parse_from_str(&raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
        .map_err(serde::de::Error::custom)
}

impl Schedule {
    pub fn new(id: ScheduleId, begin: NaiveTime, end: NaiveTime) -> Self {
        Self { id, begin, end, active: true }
    }

    /// Shift window that is current (or was last current) at `now`.
    ///
    /// `end <= begin` denotes an overnight shift; `begin == end` covers a
    /// full 24 hours.
    pub fn window_at(&self, now: NaiveDateTime) -> ShiftWindow {
        let today = now.date();
        if self.begin < self.end {
            return ShiftWindow { begin: today.and_time(self.begin), end: today.and_time(self.end) };
        }
        let begin = if now.time() >= self.begin {
            today.and_time(self.begin)
        } else {
            today.and_time(self.begin) - Duration::days(1)
        };
        let mut end = begin.date().and_time(self.end);
        if end <= begin {
            end += Duration::days(1);
        }
        ShiftWindow { begin, end }
    }

    pub fn covers(&self, now: NaiveDateTime) -> bool {
        self.window_at(now).contains(now)
    }
}

/// The department timetable selecting the schedule for "now"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timetable {
    pub around_the_clock: bool,
    pub schedules: Vec<Schedule>,
}

impl Timetable {
    pub fn new(schedules: Vec<Schedule>) -> Self {
        Self { around_the_clock: false, schedules }
    }

    /// Schedule whose window contains `now`, active or not
    pub fn schedule_at(&self, now: NaiveDateTime) -> Option<&Schedule> {
        self.schedules.iter().find(|s| s.covers(now))
    }

    pub fn active_schedule_at(&self, now: NaiveDateTime) -> Option<&Schedule> {
        self.schedule_at(now).filter(|s| s.active)
    }

    pub fn get(&self, id: ScheduleId) -> Option<&Schedule> {
        self.schedules.iter().find(|s| s.id == id)
    }

    /// Insert or replace a schedule by id
    pub fn upsert(&mut self, schedule: Schedule) {
        match self.schedules.iter_mut().find(|s| s.id == schedule.id) {
            Some(existing) => *existing = schedule,
            None => self.schedules.push(schedule),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_day_window() {
        let s = Schedule::new(ScheduleId(1), t(9, 0), t(13, 0));
        assert!(s.covers(at(2, 9, 5)));
        assert!(!s.covers(at(2, 13, 0)));
        assert!(!s.covers(at(2, 8, 59)));
    }

    #[test]
    fn test_overnight_window() {
        let s = Schedule::new(ScheduleId(1), t(22, 0), t(6, 0));
        let w = s.window_at(at(3, 2, 0));
        assert_eq!(w.begin, at(2, 22, 0));
        assert_eq!(w.end, at(3, 6, 0));
        assert!(s.covers(at(2, 23, 30)));
        assert!(!s.covers(at(3, 7, 0)));
    }

    #[test]
    fn test_full_day_window() {
        let s = Schedule::new(ScheduleId(1), t(0, 0), t(0, 0));
        assert!(s.covers(at(2, 0, 0)));
        assert!(s.covers(at(2, 23, 59)));
    }

    #[test]
    fn test_inactive_schedule_not_selected_as_active() {
        let mut s = Schedule::new(ScheduleId(1), t(9, 0), t(13, 0));
        s.active = false;
        let tt = Timetable::new(vec![s]);
        assert!(tt.schedule_at(at(2, 10, 0)).is_some());
        assert!(tt.active_schedule_at(at(2, 10, 0)).is_none());
    }

    #[test]
    fn test_deserialize_hhmm() {
        let s: Schedule = toml::from_str("id = 3\nbegin = \"09:00\"\nend = \"18:30\"").unwrap();
        assert_eq!(s.begin, t(9, 0));
        assert_eq!(s.end, t(18, 30));
        assert!(s.active);
    }
}
