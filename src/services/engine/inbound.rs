//! Handlers for notifications published by the rest of the system

use super::{QueueEngine, QueueState};
use crate::domain::{
    Algorithm, ChangeType, Notification, Schedule, SmsStatus, Visitor, Workplace,
    WorkplaceId, WorkplaceProcess, WorkplaceType,
};
use crate::infra::EngineResult;
use tracing::{debug, info};

impl QueueEngine {
    /// Apply one inbound notification
    pub fn handle(&self, notification: Notification) -> EngineResult<()> {
        let kind = notification.kind();
        debug!(kind = %kind, "notification_received");
        let result = self.with_state(|st| match notification {
            Notification::ScheduleChanged(schedule) => self.schedule_changed(st, schedule),
            Notification::AlgorithmChanged { algorithm, workplace } => {
                self.algorithm_changed(st, algorithm, workplace);
                Ok(())
            }
            Notification::WorkplaceChanged { change, workplace } => {
                self.workplace_changed(st, change, workplace)
            }
            Notification::SmsDeliveryStatus(batch) => self.sms_delivery_status(st, batch),
            Notification::AppointmentVisitorUpdate(visitor) => {
                self.appointment_visitor_update(st, visitor);
                Ok(())
            }
            Notification::AppointmentVisitorRemove(id) => {
                self.remove_active_visitor_locked(st, id);
                Ok(())
            }
        });
        self.metrics.record_notification();
        result
    }

    fn schedule_changed(&self, st: &mut QueueState, schedule: Schedule) -> EngineResult<()> {
        let now = self.now();
        let id = schedule.id;
        st.timetable.upsert(schedule);
        info!(schedule = %id, "schedule_changed");

        let Some(current) = st.timetable.schedule_at(now) else { return Ok(()) };
        if current.id != id {
            return Ok(());
        }
        if !current.active {
            self.stop_day_locked(st);
        } else if !st.day_open {
            self.start_day_locked(st, false)?;
        }
        Ok(())
    }

    /// Swap the ordering policy of every workplace running it, plus the
    /// explicitly targeted workplace
    fn algorithm_changed(&self, st: &mut QueueState, algorithm: Algorithm, target: Option<WorkplaceId>) {
        st.algorithms.insert(algorithm.id, algorithm.clone());
        let mut updated = 0usize;
        for wp in st.active_workplace_ids() {
            let Some(day) = st.workplaces.get_mut(&wp) else { continue };
            if day.workplace.algorithm == algorithm.id || target == Some(wp) {
                day.workplace.algorithm = algorithm.id;
                day.queue.update_algorithm(algorithm.clone());
                updated += 1;
            }
        }
        info!(algorithm = %algorithm.id, workplaces = %updated, "algorithm_changed");
    }

    fn workplace_changed(
        &self,
        st: &mut QueueState,
        change: ChangeType,
        workplace: Workplace,
    ) -> EngineResult<()> {
        let id = workplace.id;
        info!(workplace = %workplace, change = ?change, "workplace_changed");
        match change {
            ChangeType::Remove | ChangeType::Lock => {
                if st.workplaces.contains_key(&id) {
                    self.unregister_workplace_locked(st, id);
                    st.workplaces.remove(&id);
                    st.day_order.retain(|wp| *wp != id);
                }
            }
            ChangeType::Add | ChangeType::Change | ChangeType::Unlock => {
                if workplace.blocked {
                    return Ok(());
                }
                let automatic = workplace.kind == WorkplaceType::Automatic;
                let algorithm = self.algorithm_for(st, workplace.algorithm);
                match st.workplaces.get_mut(&id) {
                    Some(day) => {
                        day.workplace = workplace;
                        day.queue.update_algorithm(algorithm);
                        if change != ChangeType::Change {
                            day.process = WorkplaceProcess::default();
                        }
                    }
                    None => {
                        if !st.day_open {
                            return Ok(());
                        }
                        self.add_day_workplace(st, workplace);
                    }
                }
                if automatic && !st.is_registered(id) {
                    self.register_employee_locked(st, None, id)?;
                }
            }
        }
        Ok(())
    }

    fn sms_delivery_status(&self, st: &mut QueueState, batch: Vec<SmsStatus>) -> EngineResult<()> {
        for status in batch {
            let Some(visitor) = st.visitors.get_mut(&status.visitor) else { continue };
            visitor.delivery_status = status.status;
            let visitor = visitor.clone();
            self.persist(&visitor)?;
            debug!(visitor = %visitor, status = ?status.status, "sms_status_updated");
            self.update_active_visitor(st, visitor, true);
        }
        Ok(())
    }

    /// Refresh a booked visitor from the appointment module, keeping its
    /// runtime state
    fn appointment_visitor_update(&self, st: &mut QueueState, mut visitor: Visitor) {
        if let Some(existing) = st.visitors.get(&visitor.id) {
            visitor.process = existing.process.clone();
        }
        info!(visitor = %visitor, "appointment_visitor_updated");
        self.update_active_visitor(st, visitor, true);
    }
}
