//! Visitor record and its transient per-shift process state

use crate::domain::appointment::Appointment;
use crate::domain::types::{
    DeliveryStatus, RoomId, ServiceId, VisitorId, VisitorStatus, WorkplaceId,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Comment attached to visitors recovered from an interrupted call
pub const RESTORE_COMMENT: &str = "restored after restart";

/// Resume trigger for a held-over visitor. Exactly one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldoverDelay {
    /// Number of further completions/holdovers at the origin workplace
    Count(u32),
    /// Absolute resume time
    Until(NaiveDateTime),
}

/// Runtime-only state, rebuilt when the visitor is loaded for a shift
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisitorProcess {
    pub delay: Option<HoldoverDelay>,
    /// Service the visitor returns to once the delay elapses
    pub delay_service_from: Option<ServiceId>,
    /// Workplace whose completions count down a `HoldoverDelay::Count`
    pub delay_origin: Option<WorkplaceId>,
    pub count_before: u32,
    pub minutes_before: u32,
    pub arrived: bool,
    pub suspended: bool,
}

impl VisitorProcess {
    pub fn clear_delay(&mut self) {
        self.delay = None;
        self.delay_service_from = None;
        self.delay_origin = None;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visitor {
    pub id: VisitorId,
    #[serde(default)]
    pub ticket: Option<String>,
    pub next_service: ServiceId,
    #[serde(default)]
    pub current_workplace: Option<WorkplaceId>,
    pub status: VisitorStatus,
    /// Ordered appointment sequence; the first entry is the parent appointment
    #[serde(default)]
    pub appointments: Vec<Appointment>,
    pub registered_at: NaiveDateTime,
    #[serde(default)]
    pub call_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub complete_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub desired_room: Option<RoomId>,
    #[serde(default)]
    pub desired_workplace: Option<WorkplaceId>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub delivery_status: DeliveryStatus,
    #[serde(skip)]
    pub process: VisitorProcess,
}

impl Visitor {
    pub fn new(id: VisitorId, service: ServiceId, registered_at: NaiveDateTime) -> Self {
        Self {
            id,
            ticket: None,
            next_service: service,
            current_workplace: None,
            status: VisitorStatus::Signup,
            appointments: Vec::new(),
            registered_at,
            call_date: None,
            complete_date: None,
            desired_room: None,
            desired_workplace: None,
            comment: None,
            delivery_status: DeliveryStatus::Unknown,
            process: VisitorProcess::default(),
        }
    }

    pub fn with_ticket(mut self, ticket: &str) -> Self {
        self.ticket = Some(ticket.to_string());
        self
    }

    pub fn with_appointments(mut self, appointments: Vec<Appointment>) -> Self {
        self.appointments = appointments;
        self
    }

    pub fn ticket_str(&self) -> &str {
        self.ticket.as_deref().unwrap_or("")
    }

    pub fn parent_appointment(&self) -> Option<&Appointment> {
        self.appointments.first()
    }

    /// Visitor came through booking with a concrete time slot
    pub fn is_appointment_visitor(&self) -> bool {
        self.parent_appointment().is_some_and(|a| a.from.is_some())
    }

    /// Appointment step matching the service the visitor is waiting for
    pub fn current_appointment(&self) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.service == self.next_service)
    }

    pub fn current_appointment_mut(&mut self) -> Option<&mut Appointment> {
        let service = self.next_service;
        self.appointments.iter_mut().find(|a| a.service == service)
    }

    /// Timed appointment for the current service whose window has not
    /// ended before `since`
    pub fn current_service_appointment(&self, since: NaiveDateTime) -> Option<&Appointment> {
        self.current_appointment()
            .filter(|a| a.from.is_some() && a.to.map_or(true, |to| to >= since))
    }

    /// Current-service appointment the visitor missed
    pub fn lost_appointment(&self) -> Option<&Appointment> {
        self.current_appointment()
            .filter(|a| a.status == crate::domain::types::AppointmentStatus::Overdue)
    }

    /// Step following the one for the current service, if any
    pub fn next_appointment_step(&self) -> Option<&Appointment> {
        let idx = self.appointments.iter().position(|a| a.service == self.next_service)?;
        self.appointments.get(idx + 1)
    }

    /// Distribution affinity only applies to the original assignment
    pub fn clear_affinity(&mut self) {
        self.desired_room = None;
        self.desired_workplace = None;
    }
}

impl std::fmt::Display for Visitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "visitor#{}({})", self.id, self.ticket_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{AppointmentId, AppointmentStatus};
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn staged_visitor() -> Visitor {
        let id = VisitorId(7);
        Visitor::new(id, ServiceId(1), at(9, 0)).with_appointments(vec![
            Appointment::new(AppointmentId(1), id, ServiceId(1)).at(at(10, 0), at(10, 15)),
            Appointment::new(AppointmentId(2), id, ServiceId(2)),
        ])
    }

    #[test]
    fn test_next_step_lookup() {
        let mut visitor = staged_visitor();
        assert_eq!(visitor.next_appointment_step().map(|a| a.service), Some(ServiceId(2)));
        visitor.next_service = ServiceId(2);
        assert!(visitor.next_appointment_step().is_none());
    }

    #[test]
    fn test_appointment_visitor_requires_time_slot() {
        assert!(staged_visitor().is_appointment_visitor());
        let walk_in = Visitor::new(VisitorId(1), ServiceId(1), at(9, 0));
        assert!(!walk_in.is_appointment_visitor());
    }

    #[test]
    fn test_current_service_appointment_window() {
        let visitor = staged_visitor();
        assert!(visitor.current_service_appointment(at(9, 0)).is_some());
        assert!(visitor.current_service_appointment(at(10, 16)).is_none());
    }

    #[test]
    fn test_lost_appointment() {
        let mut visitor = staged_visitor();
        assert!(visitor.lost_appointment().is_none());
        visitor.current_appointment_mut().unwrap().status = AppointmentStatus::Overdue;
        assert_eq!(visitor.lost_appointment().map(|a| a.id), Some(AppointmentId(1)));
    }
}
