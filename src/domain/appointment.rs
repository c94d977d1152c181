//! Pre-booked appointment steps attached to a visitor

use crate::domain::types::{AppointmentId, AppointmentStatus, ServiceId, VisitorId, WorkplaceId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One booked step of a visitor's appointment sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub visitor: VisitorId,
    pub service: ServiceId,
    #[serde(default)]
    pub workplace: Option<WorkplaceId>,
    /// Booked window start; None for steps queued without a time slot
    #[serde(default)]
    pub from: Option<NaiveDateTime>,
    #[serde(default)]
    pub to: Option<NaiveDateTime>,
    #[serde(default)]
    pub status: AppointmentStatus,
}

impl Appointment {
    pub fn new(id: AppointmentId, visitor: VisitorId, service: ServiceId) -> Self {
        Self {
            id,
            visitor,
            service,
            workplace: None,
            from: None,
            to: None,
            status: AppointmentStatus::Active,
        }
    }

    pub fn at(mut self, from: NaiveDateTime, to: NaiveDateTime) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn with_workplace(mut self, workplace: WorkplaceId) -> Self {
        self.workplace = Some(workplace);
        self
    }

    /// Booked window has started at `now`
    pub fn is_open(&self, now: NaiveDateTime) -> bool {
        self.from.is_some_and(|from| from <= now)
    }

    /// Booked window ended before `now`
    pub fn has_lapsed(&self, now: NaiveDateTime) -> bool {
        self.to.is_some_and(|to| to < now)
    }

    /// Still awaiting the visitor (not completed, not yet marked overdue)
    pub fn is_pending(&self) -> bool {
        matches!(self.status, AppointmentStatus::Active | AppointmentStatus::Confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_window_checks() {
        let appt = Appointment::new(AppointmentId(1), VisitorId(1), ServiceId(1))
            .at(at(10, 0), at(10, 15));
        assert!(!appt.is_open(at(9, 59)));
        assert!(appt.is_open(at(10, 0)));
        assert!(!appt.has_lapsed(at(10, 15)));
        assert!(appt.has_lapsed(at(10, 16)));
    }

    #[test]
    fn test_untimed_step_never_opens() {
        let appt = Appointment::new(AppointmentId(1), VisitorId(1), ServiceId(1));
        assert!(!appt.is_open(at(12, 0)));
        assert!(!appt.has_lapsed(at(12, 0)));
        assert!(appt.is_pending());
    }
}
