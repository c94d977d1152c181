//! Ticket issuing and appointment housekeeping

use crate::domain::{Appointment, Service, ServiceId, Visitor};
use crate::infra::RepositoryError;
use crate::services::repository::Repository;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub trait Registration: Send + Sync {
    /// Next display ticket for `service`
    fn issue_ticket(&self, service: &Service) -> String;

    /// Reset per-day state such as ticket counters
    fn reinit(&self);

    /// Remove appointments and visitors that never finished during the day
    fn remove_appointments_and_visitors(&self) -> Result<(), RepositoryError>;

    fn remove_parent_appointment(&self, appointment: &Appointment) -> Result<(), RepositoryError>;

    /// Release booked slots of the steps following `service`, leaving
    /// those steps untimed
    fn clear_next_time_slots(&self, visitor: &mut Visitor, service: ServiceId);
}

/// Registration backed by the local repository.
///
/// Tickets are `<prefix><counter>` with a three digit counter kept per
/// prefix, e.g. `A001`.
pub struct LocalRegistration {
    repository: Arc<dyn Repository>,
    counters: Mutex<FxHashMap<String, u32>>,
}

impl LocalRegistration {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository, counters: Mutex::new(FxHashMap::default()) }
    }
}

impl Registration for LocalRegistration {
    fn issue_ticket(&self, service: &Service) -> String {
        let mut counters = self.counters.lock();
        let counter = counters.entry(service.prefix.clone()).or_insert(0);
        *counter += 1;
        format!("{}{:03}", service.prefix, counter)
    }

    fn reinit(&self) {
        self.counters.lock().clear();
        debug!("ticket_counters_reset");
    }

    fn remove_appointments_and_visitors(&self) -> Result<(), RepositoryError> {
        let removed = self.repository.remove_open_visitors()?;
        info!(removed = %removed, "day_visitors_removed");
        Ok(())
    }

    fn remove_parent_appointment(&self, appointment: &Appointment) -> Result<(), RepositoryError> {
        self.repository.remove_appointment(appointment.id)?;
        debug!(appointment = %appointment.id, visitor = %appointment.visitor, "parent_appointment_removed");
        Ok(())
    }

    fn clear_next_time_slots(&self, visitor: &mut Visitor, service: ServiceId) {
        let Some(idx) = visitor.appointments.iter().position(|a| a.service == service) else {
            return;
        };
        let mut released = 0;
        for step in visitor.appointments.iter_mut().skip(idx + 1) {
            if step.from.is_some() {
                released += 1;
            }
            step.from = None;
            step.to = None;
        }
        if released > 0 {
            info!(visitor = %visitor.id, released = %released, "time_slots_released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AppointmentId, VisitorId};
    use crate::services::repository::InMemoryRepository;
    use chrono::NaiveDate;

    fn registration() -> LocalRegistration {
        LocalRegistration::new(Arc::new(InMemoryRepository::new()))
    }

    #[test]
    fn test_tickets_count_per_prefix() {
        let reg = registration();
        let a = Service::new(ServiceId(1), "a").with_prefix("A");
        let d = Service::new(ServiceId(2), "d").with_prefix("D");
        assert_eq!(reg.issue_ticket(&a), "A001");
        assert_eq!(reg.issue_ticket(&a), "A002");
        assert_eq!(reg.issue_ticket(&d), "D001");
    }

    #[test]
    fn test_clear_next_time_slots_untimes_later_steps() {
        let reg = registration();
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let at = |h, m| day.and_hms_opt(h, m, 0).unwrap();
        let id = VisitorId(7);
        let mut visitor = Visitor::new(id, ServiceId(1), at(9, 0)).with_appointments(vec![
            Appointment::new(AppointmentId(1), id, ServiceId(1)).at(at(10, 0), at(10, 15)),
            Appointment::new(AppointmentId(2), id, ServiceId(2)).at(at(10, 30), at(10, 45)),
            Appointment::new(AppointmentId(3), id, ServiceId(3)),
        ]);

        reg.clear_next_time_slots(&mut visitor, ServiceId(1));
        assert_eq!(visitor.appointments[0].from, Some(at(10, 0)));
        assert_eq!(visitor.appointments[1].from, None);
        assert_eq!(visitor.appointments[1].to, None);
        assert_eq!(visitor.appointments[2].from, None);

        // Unknown service leaves the plan untouched
        let mut other = Visitor::new(VisitorId(8), ServiceId(1), at(9, 0)).with_appointments(vec![
            Appointment::new(AppointmentId(4), VisitorId(8), ServiceId(2)).at(at(11, 0), at(11, 15)),
        ]);
        reg.clear_next_time_slots(&mut other, ServiceId(5));
        assert_eq!(other.appointments[0].from, Some(at(11, 0)));
    }

    #[test]
    fn test_reinit_restarts_counters() {
        let reg = registration();
        let a = Service::new(ServiceId(1), "a").with_prefix("A");
        reg.issue_ticket(&a);
        reg.reinit();
        assert_eq!(reg.issue_ticket(&a), "A001");
    }
}
