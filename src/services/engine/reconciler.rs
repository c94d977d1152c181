//! Timer-driven reconciliation: day boundaries, appointment auto-calls,
//! timed holdover returns and workplace liveness

use super::{resume_holdover, QueueEngine, QueueState};
use crate::domain::{
    AppointmentStatus, HoldoverDelay, VisitorEvent, VisitorId, VisitorStatus, WorkplaceId,
    WorkplaceType,
};
use crate::infra::EngineResult;
use chrono::{Duration, NaiveDateTime, Timelike};
use rand::seq::SliceRandom;
use tracing::{debug, error, info, warn};

/// Grace added to the stale threshold before a sweep is trusted
const ACTIVITY_CHECK_GRACE_SECS: i64 = 60;

impl QueueEngine {
    pub(super) fn minute_tick_locked(&self, st: &mut QueueState) {
        if !self.config.is_serving() {
            return;
        }
        let now = self.now();
        let active_schedule = st.timetable.active_schedule_at(now).is_some();

        if !active_schedule {
            if st.day_open {
                self.stop_day_locked(st);
            }
        } else if !st.day_open {
            if let Err(e) = self.start_day_locked(st, false) {
                self.metrics.record_tick_failure();
                error!(error = %e, "tick_day_open_failed");
            }
        }

        if !st.day_open {
            return;
        }
        if let Err(e) = self.check_appointments(st, now) {
            self.metrics.record_tick_failure();
            error!(error = %e, "tick_appointment_check_failed");
        }
        if let Err(e) = self.return_timed_holdovers(st, now) {
            self.metrics.record_tick_failure();
            error!(error = %e, "tick_holdover_return_failed");
        }
    }

    /// Runs the appointment check when something changed since the last
    /// fine tick and any free workplace may call appointment visitors
    pub(super) fn second_tick_locked(&self, st: &mut QueueState) {
        if !st.visitor_event_flag {
            return;
        }
        // Calls made below raise the flag again for one more pass
        st.visitor_event_flag = false;
        if self.config.free_workplace_call() && st.day_open {
            let now = self.now();
            if let Err(e) = self.check_appointments(st, now) {
                self.metrics.record_tick_failure();
                error!(error = %e, "tick_appointment_check_failed");
            }
        }
    }

    /// Appointment housekeeping; at most one auto-call per pass
    pub(super) fn check_appointments(&self, st: &mut QueueState, now: NaiveDateTime) -> EngineResult<()> {
        self.check_workplace_activity(st, now);
        let free_call = self.config.free_workplace_call();

        // Auto-called visitors are completed when their booked slot ends,
        // unless any free workplace may take them
        if !free_call {
            let finished: Vec<VisitorId> = st
                .ordered_visitor_ids()
                .into_iter()
                .filter(|id| {
                    st.visitors.get(id).is_some_and(|v| {
                        v.status == VisitorStatus::CallNextAuto
                            && v.is_appointment_visitor()
                            && v.current_appointment().and_then(|a| a.to).is_some_and(|to| {
                                to.hour() == now.hour() && to.minute() == now.minute()
                            })
                    })
                })
                .collect();
            for id in finished {
                self.complete_booked_call(st, id)?;
            }
        }

        let mut acted = false;
        for id in st.ordered_visitor_ids() {
            let Some(visitor) = st.visitors.get_mut(&id) else { continue };
            if !visitor.is_appointment_visitor()
                || visitor.status == VisitorStatus::Holdover
                || visitor.status.is_called()
            {
                continue;
            }
            let Some(appointment) = visitor.current_appointment_mut() else { continue };
            if !appointment.is_open(now) {
                continue;
            }
            if appointment.is_pending() && appointment.has_lapsed(now) {
                appointment.status = AppointmentStatus::Overdue;
                info!(visitor = %id, appointment = %appointment.id, "appointment_overdue");
            }
            // Missed slots are picked up by the lost-appointment pass
            if free_call && appointment.status == AppointmentStatus::Overdue {
                continue;
            }
            let workplace = visitor.current_workplace;
            self.try_booked_call(st, id, workplace)?;
            acted = true;
            break;
        }

        if free_call && !acted {
            let lost = st.ordered_visitor_ids().into_iter().find(|id| {
                st.visitors.get(id).is_some_and(|v| {
                    v.is_appointment_visitor()
                        && v.status != VisitorStatus::Holdover
                        && !v.status.is_called()
                        && v.lost_appointment().is_some()
                })
            });
            if let Some(id) = lost {
                let workplace = st.visitors.get(&id).and_then(|v| v.current_workplace);
                self.try_booked_call(st, id, workplace)?;
            }
        }
        Ok(())
    }

    fn complete_booked_call(&self, st: &mut QueueState, id: VisitorId) -> EngineResult<()> {
        let Some(workplace) = st.visitors.get(&id).and_then(|v| v.current_workplace) else {
            return Ok(());
        };
        if !st.is_registered(workplace) || st.current_visitor_at(workplace) != Some(id) {
            return Ok(());
        }
        if let Some(day) = st.workplaces.get_mut(&workplace) {
            day.queue.set_prev_visitor(id);
        }
        info!(visitor = %id, workplace = %workplace, "appointment_slot_ended");
        self.complete_locked(st, id)?;
        Ok(())
    }

    /// Call an appointment visitor: at its booked workplace, or at a random
    /// free workplace taking appointments when free calling is enabled
    fn try_booked_call(
        &self,
        st: &mut QueueState,
        id: VisitorId,
        workplace: Option<WorkplaceId>,
    ) -> EngineResult<()> {
        let target = if self.config.free_workplace_call() {
            let Some(service) = st.visitors.get(&id).map(|v| v.next_service) else { return Ok(()) };
            let free: Vec<WorkplaceId> = st
                .active_workplace_ids()
                .into_iter()
                .filter(|wp| st.current_visitor_at(*wp).is_none())
                .filter(|wp| {
                    st.workplaces
                        .get(wp)
                        .is_some_and(|d| d.workplace.serves_appointments(&st.catalog, service))
                })
                .collect();
            match free.choose(&mut rand::thread_rng()) {
                Some(wp) => *wp,
                None => {
                    debug!(visitor = %id, "appointment_no_free_workplace");
                    return Ok(());
                }
            }
        } else {
            let Some(wp) = workplace.filter(|wp| st.is_registered(*wp)) else {
                warn!(visitor = %id, workplace = ?workplace, "appointment_workplace_inactive");
                return Ok(());
            };
            if let Some(current) = st.current_visitor_at(wp) {
                if let Some(day) = st.workplaces.get_mut(&wp) {
                    day.queue.set_prev_visitor(current);
                }
                self.complete_locked(st, current)?;
            }
            wp
        };

        if self.call_specific_locked(st, target, id, VisitorStatus::CallNextAuto)?.is_some() {
            self.metrics.record_appointment_auto();
        }
        Ok(())
    }

    /// Return visitors whose timed holdover has elapsed
    fn return_timed_holdovers(&self, st: &mut QueueState, now: NaiveDateTime) -> EngineResult<()> {
        let due: Vec<VisitorId> = st
            .visitors
            .values()
            .filter(|v| v.status == VisitorStatus::Holdover)
            .filter(|v| matches!(v.process.delay, Some(HoldoverDelay::Until(until)) if now >= until))
            .map(|v| v.id)
            .collect();
        if due.is_empty() {
            return Ok(());
        }

        for id in &due {
            let Some(mut visitor) = st.visitors.get(id).cloned() else { continue };
            resume_holdover(&mut visitor);
            self.persist(&visitor)?;
            st.visitors.insert(*id, visitor.clone());
            self.metrics.record_holdover_returned();
            info!(visitor = %visitor, service = %visitor.next_service, "holdover_returned_by_time");
        }
        self.emit_visitor(st, VisitorEvent::rebuild_all());
        Ok(())
    }

    /// Unregister operator workplaces that stopped reporting activity.
    /// Skipped when the previous sweep is too old to trust (e.g. after a
    /// pause of the process).
    fn check_workplace_activity(&self, st: &mut QueueState, now: NaiveDateTime) {
        let threshold = Duration::milliseconds(self.config.workplace_stale_ms() as i64);
        let trusted = st.last_activity_check.is_some_and(|last| {
            now - last <= threshold + Duration::seconds(ACTIVITY_CHECK_GRACE_SECS)
        });
        st.last_activity_check = Some(now);
        if !trusted {
            return;
        }

        let stale: Vec<WorkplaceId> = st
            .active_workplace_ids()
            .into_iter()
            .filter(|wp| {
                st.workplaces.get(wp).is_some_and(|d| {
                    d.workplace.kind == WorkplaceType::Operator
                        && d.process.last_active.is_some_and(|at| now - at > threshold)
                })
            })
            .collect();
        for wp in stale {
            warn!(workplace = %wp, "workplace_inactive_unregistered");
            self.metrics.record_workplace_stale();
            self.unregister_workplace_locked(st, wp);
        }
    }
}
