//! Visitor state machine: registration, calls, completion, cancellation,
//! holdover and redirects

use super::{is_eligible, QueueEngine, QueueState};
use crate::domain::{
    AppointmentStatus, CancelReason, DistributionPolicy, HoldoverDelay, RoomId, ServiceId,
    Visitor, VisitorEvent, VisitorId, VisitorStatus, WorkplaceId,
};
use crate::infra::{EngineError, EngineResult};
use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info, warn};

impl QueueEngine {
    pub(super) fn register_locked(
        &self,
        st: &mut QueueState,
        mut visitor: Visitor,
    ) -> EngineResult<Visitor> {
        let service = st
            .catalog
            .get(visitor.next_service)
            .cloned()
            .ok_or(EngineError::UnknownService(visitor.next_service))?;
        self.check_queue_limit(st, None)?;
        if !visitor.is_appointment_visitor() {
            self.assign_distribution(st, &mut visitor)?;
        }
        if visitor.ticket.is_none() {
            visitor.ticket = Some(self.registration.issue_ticket(&service));
        }
        visitor.status = VisitorStatus::Signup;
        self.estimate_position(st, &mut visitor);

        self.persist(&visitor)?;
        self.log_operation(st, &visitor, visitor.next_service, None)?;
        self.metrics.record_registered();
        info!(
            visitor = %visitor,
            service = %visitor.next_service,
            count_before = %visitor.process.count_before,
            minutes_before = %visitor.process.minutes_before,
            "visitor_registered"
        );
        self.update_active_visitor(st, visitor.clone(), true);
        Ok(visitor)
    }

    /// Reject when the waiting line already holds `max_visitor_queue` visitors
    fn check_queue_limit(&self, st: &QueueState, exclude: Option<VisitorId>) -> EngineResult<()> {
        let limit = self.config.max_visitor_queue();
        if limit == 0 {
            return Ok(());
        }
        let waiting = st
            .visitors
            .values()
            .filter(|v| Some(v.id) != exclude && !v.status.is_called())
            .count();
        if waiting >= limit {
            warn!(waiting = %waiting, limit = %limit, "visitor_queue_full");
            return Err(EngineError::MaxVisitorsExceeded { limit });
        }
        Ok(())
    }

    /// Check a workplace can take the visitor live and pick its room or
    /// workstation under the configured policy
    fn assign_distribution(&self, st: &QueueState, visitor: &mut Visitor) -> EngineResult<()> {
        let service = visitor.next_service;
        let policy = self.config.distribution();
        let rejected = EngineError::LiveQueueNotAllowed { service, policy: policy.as_str() };
        let live: Vec<WorkplaceId> = st
            .day_order
            .iter()
            .copied()
            .filter(|id| {
                st.workplaces.get(id).is_some_and(|d| {
                    !d.workplace.blocked && d.workplace.serves_live(&st.catalog, service)
                })
            })
            .collect();

        match policy {
            DistributionPolicy::Default => {
                if live.is_empty() {
                    return Err(rejected);
                }
            }
            DistributionPolicy::ByRoom => {
                let rooms: Vec<RoomId> = live
                    .iter()
                    .filter(|id| st.is_registered(**id))
                    .filter_map(|id| st.workplaces.get(id).and_then(|d| d.workplace.room))
                    .collect();
                let chosen = match visitor.desired_room {
                    Some(room) => rooms.contains(&room).then_some(room),
                    None => rooms.iter().copied().min_by_key(|room| {
                        let load = st
                            .visitors
                            .values()
                            .filter(|v| v.desired_room == Some(*room) && !v.status.is_called())
                            .count();
                        (load, *room)
                    }),
                };
                match chosen {
                    Some(room) => visitor.desired_room = Some(room),
                    None if self.config.allow_unassigned() => visitor.desired_room = None,
                    None => return Err(rejected),
                }
            }
            DistributionPolicy::ByWorkstation => {
                let stations: Vec<WorkplaceId> =
                    live.iter().copied().filter(|id| st.is_registered(*id)).collect();
                let chosen = match visitor.desired_workplace {
                    Some(wp) => stations.contains(&wp).then_some(wp),
                    None => stations.iter().copied().min_by_key(|wp| {
                        let load = st
                            .visitors
                            .values()
                            .filter(|v| {
                                !v.status.is_called()
                                    && (v.desired_workplace == Some(*wp)
                                        || v.current_workplace == Some(*wp))
                            })
                            .count();
                        (load, *wp)
                    }),
                };
                match chosen {
                    Some(wp) => visitor.desired_workplace = Some(wp),
                    None if self.config.allow_unassigned() => visitor.desired_workplace = None,
                    None => return Err(rejected),
                }
            }
        }
        Ok(())
    }

    /// Visitors ahead in line and the expected wait from the service's
    /// routine time, spread over the workplaces serving it
    fn estimate_position(&self, st: &QueueState, visitor: &mut Visitor) {
        let service = visitor.next_service;
        let ahead = st
            .visitors
            .values()
            .filter(|v| v.id != visitor.id && !v.status.is_called() && v.next_service == service)
            .filter(|v| match self.config.distribution() {
                DistributionPolicy::Default => true,
                DistributionPolicy::ByRoom => v.desired_room == visitor.desired_room,
                DistributionPolicy::ByWorkstation => v.desired_workplace == visitor.desired_workplace,
            })
            .count() as u32;
        let servers = st
            .active_workplace_ids()
            .into_iter()
            .filter(|id| {
                st.workplaces.get(id).is_some_and(|d| d.workplace.serves_live(&st.catalog, service))
            })
            .count()
            .max(1) as u32;
        visitor.process.count_before = ahead;
        visitor.process.minutes_before = ahead * st.catalog.routine_minutes(service) / servers;
    }

    /// Refresh a visitor in the active set, dropping it when it is no longer
    /// eligible for the current shift. `fire` announces a full rebuild.
    ///
    /// Outside any schedule there is no window to check appointments
    /// against, so a visitor already in the set keeps its place with the
    /// new record.
    pub(super) fn update_active_visitor(&self, st: &mut QueueState, visitor: Visitor, fire: bool) {
        let now = self.now();
        let known = st.visitors.remove(&visitor.id).is_some();
        let keep = match self.shift_window(st, now) {
            Some(window) => is_eligible(&visitor, window),
            None => known && visitor.status != VisitorStatus::Complete && visitor.ticket.is_some(),
        };
        if !keep {
            debug!(visitor = %visitor, status = %visitor.status, "visitor_left_active_set");
            return;
        }
        let event = VisitorEvent::for_visitor(&visitor, None, visitor.ticket_str(), None);
        st.visitors.insert(visitor.id, visitor);
        if fire {
            self.emit_visitor(st, event);
        }
    }

    pub(super) fn call_next_locked(
        &self,
        st: &mut QueueState,
        workplace: WorkplaceId,
    ) -> EngineResult<Option<Visitor>> {
        if !st.workplaces.contains_key(&workplace) {
            return Err(EngineError::UnknownWorkplace(workplace));
        }
        if let Some(current) = st.current_visitor_at(workplace) {
            self.complete_locked(st, current)?;
        }
        if !st.is_registered(workplace) {
            info!(workplace = %workplace, "call_next_workplace_inactive");
            return Ok(None);
        }

        loop {
            let next = st.workplaces.get_mut(&workplace).and_then(|d| d.queue.next_for_call());
            let Some(id) = next else {
                debug!(workplace = %workplace, "call_next_queue_empty");
                return Ok(None);
            };
            if st.visitors.get(&id).is_some_and(|v| !v.status.is_called()) {
                return self.call_specific_locked(st, workplace, id, VisitorStatus::CallNext);
            }
            debug!(workplace = %workplace, visitor = %id, "call_next_skipped_stale");
        }
    }

    pub(super) fn call_visitor_locked(
        &self,
        st: &mut QueueState,
        workplace: WorkplaceId,
        id: VisitorId,
    ) -> EngineResult<Option<Visitor>> {
        if !st.workplaces.contains_key(&workplace) {
            return Err(EngineError::UnknownWorkplace(workplace));
        }
        let Some(visitor) = st.visitors.get(&id) else {
            info!(visitor = %id, "call_visitor_not_found");
            return Ok(None);
        };
        if visitor.status.is_called() {
            info!(visitor = %visitor, at = ?visitor.current_workplace, "call_visitor_already_called");
            return Ok(None);
        }

        // The jump displaces whoever is at the counter
        if let Some(current) = st.current_visitor_at(workplace) {
            let service = st.visitors.get(&current).map(|v| v.next_service);
            if service.and_then(|s| st.catalog.holdover_target(s)).is_some() {
                self.holdover_locked(st, current, "", 0, 0)?;
            } else {
                self.complete_locked(st, current)?;
            }
        }
        self.call_specific_locked(st, workplace, id, VisitorStatus::CallJump)
    }

    pub(super) fn call_specific_locked(
        &self,
        st: &mut QueueState,
        workplace: WorkplaceId,
        id: VisitorId,
        status: VisitorStatus,
    ) -> EngineResult<Option<Visitor>> {
        let Some(mut visitor) = st.visitors.get(&id).cloned() else {
            return Ok(None);
        };
        let now = self.now();
        visitor.status = status;
        visitor.call_date = Some(now);
        visitor.current_workplace = Some(workplace);

        self.persist(&visitor)?;
        st.visitors.insert(id, visitor.clone());
        st.set_current_visitor(workplace, Some(id));
        if let Some(day) = st.workplaces.get_mut(&workplace) {
            day.process.last_active = Some(now);
        }
        self.log_operation(st, &visitor, visitor.next_service, Some(workplace))?;
        self.metrics.record_called();
        info!(visitor = %visitor, workplace = %workplace, status = %status, "visitor_called");

        let employee = st.employee_at(workplace);
        self.emit_visitor(
            st,
            VisitorEvent::for_visitor(&visitor, Some(workplace), visitor.ticket_str(), employee),
        );
        Ok(Some(visitor))
    }

    pub(super) fn complete_locked(
        &self,
        st: &mut QueueState,
        id: VisitorId,
    ) -> EngineResult<Option<Visitor>> {
        let Some(mut visitor) = st.visitors.get(&id).cloned() else {
            info!(visitor = %id, "complete_visitor_not_found");
            return Ok(None);
        };
        let now = self.now();
        let served = visitor.next_service;
        let workplace = visitor.current_workplace;
        let employee = workplace.and_then(|wp| st.employee_at(wp));
        let next_step = visitor.next_appointment_step().cloned();

        if let Some(appointment) = visitor.current_appointment_mut() {
            appointment.status = AppointmentStatus::Completed;
        }
        visitor.complete_date = Some(now);

        if let Some(step) = next_step {
            visitor.status = VisitorStatus::StepComplete;
            self.persist(&visitor)?;
            self.leave_workplace(st, &visitor, workplace, now);
            self.log_operation(st, &visitor, served, workplace)?;
            st.tally_served(workplace, served);
            self.emit_visitor(st, VisitorEvent::for_visitor(&visitor, workplace, "", employee));

            // A step bound to a blocked workplace without a slot goes back
            // to the general queue
            let target = step.workplace.filter(|wp| {
                step.from.is_some() || st.workplaces.get(wp).map_or(true, |d| !d.workplace.blocked)
            });
            visitor.next_service = step.service;
            visitor.current_workplace = target;
            visitor.clear_affinity();
            self.persist(&visitor)?;
            info!(visitor = %visitor, next_service = %step.service, "visitor_next_step");
            self.update_active_visitor(st, visitor.clone(), true);
            return Ok(Some(visitor));
        }

        if let Some(redirect) = st.catalog.auto_redirect_target(served) {
            visitor.status = VisitorStatus::StepComplete;
            self.persist(&visitor)?;
            self.leave_workplace(st, &visitor, workplace, now);
            self.log_operation(st, &visitor, served, workplace)?;
            st.tally_served(workplace, served);
            self.emit_visitor(st, VisitorEvent::for_visitor(&visitor, workplace, "", employee));

            visitor.status = VisitorStatus::MoveToService;
            visitor.next_service = redirect;
            visitor.current_workplace = None;
            visitor.clear_affinity();
            self.persist(&visitor)?;
            self.log_operation(st, &visitor, redirect, None)?;
            info!(visitor = %visitor, service = %redirect, "visitor_auto_redirected");
            self.update_active_visitor(st, visitor.clone(), true);
            return Ok(Some(visitor));
        }

        visitor.status = VisitorStatus::Complete;
        visitor.current_workplace = None;
        self.persist(&visitor)?;
        self.leave_workplace(st, &visitor, workplace, now);
        st.visitors.remove(&id);
        self.log_operation(st, &visitor, served, workplace)?;
        st.tally_served(workplace, served);
        info!(visitor = %visitor, workplace = ?workplace, "visitor_completed");
        self.emit_visitor(st, VisitorEvent::for_visitor(&visitor, workplace, "", employee));
        Ok(Some(visitor))
    }

    /// Free the counter once the completed step is stored. The stored
    /// record replaces the called one so no active visitor stays called
    /// without a slot.
    fn leave_workplace(
        &self,
        st: &mut QueueState,
        visitor: &Visitor,
        workplace: Option<WorkplaceId>,
        now: NaiveDateTime,
    ) {
        if let Some(wp) = workplace {
            st.release_slot(wp, visitor.id);
            if let Some(day) = st.workplaces.get_mut(&wp) {
                day.process.last_active = Some(now);
            }
        }
        if let Some(stored) = st.visitors.get_mut(&visitor.id) {
            *stored = visitor.clone();
        }
        self.metrics.record_completed();
    }

    pub(super) fn cancel_locked(
        &self,
        st: &mut QueueState,
        workplace: Option<WorkplaceId>,
        id: VisitorId,
        reason: CancelReason,
    ) -> EngineResult<Option<Visitor>> {
        let Some(mut visitor) = st.visitors.get(&id).cloned() else {
            info!(visitor = %id, "cancel_visitor_not_found");
            return Ok(None);
        };
        let served = visitor.next_service;
        let at = visitor.current_workplace;
        let employee = at.and_then(|wp| st.employee_at(wp));
        let consulted = workplace.is_some()
            && visitor.status.is_called()
            && reason == CancelReason::Consulted;

        visitor.status = reason.status();
        visitor.complete_date = Some(self.now());
        self.persist(&visitor)?;

        if let Some(wp) = at {
            st.release_slot(wp, id);
        }
        if let Some(wp) = workplace {
            st.release_slot(wp, id);
        }
        st.visitors.remove(&id);
        self.log_operation(st, &visitor, served, at)?;
        if consulted {
            st.tally_served(at, served);
        }
        self.metrics.record_cancelled();
        info!(visitor = %visitor, reason = %visitor.status, workplace = ?workplace, "visitor_cancelled");

        let event = match workplace {
            Some(_) => VisitorEvent::for_visitor(&visitor, at, "", employee),
            None => VisitorEvent::rebuild_all(),
        };
        self.emit_visitor(st, event);

        if let Some(parent) = visitor.parent_appointment() {
            self.registration.remove_parent_appointment(parent)?;
        }
        Ok(Some(visitor))
    }

    pub(super) fn holdover_locked(
        &self,
        st: &mut QueueState,
        id: VisitorId,
        reason: &str,
        delay_minutes: u32,
        delay_count: u32,
    ) -> EngineResult<Option<Visitor>> {
        let Some(mut visitor) = st.visitors.get(&id).cloned() else {
            info!(visitor = %id, "holdover_visitor_not_found");
            return Ok(None);
        };
        let from = visitor.next_service;
        let Some(target) = st.catalog.holdover_target(from) else {
            warn!(visitor = %visitor, service = %from, "holdover_target_missing");
            return Ok(None);
        };
        let now = self.now();
        let origin = visitor.current_workplace;
        let employee = origin.and_then(|wp| st.employee_at(wp));

        self.registration.clear_next_time_slots(&mut visitor, from);

        visitor.status = VisitorStatus::Holdover;
        visitor.complete_date = Some(now);
        if !reason.is_empty() {
            visitor.comment = Some(reason.to_string());
        }
        visitor.process.clear_delay();
        visitor.process.delay = if delay_minutes > 0 {
            Some(HoldoverDelay::Until(now + Duration::minutes(i64::from(delay_minutes))))
        } else if delay_count > 0 {
            Some(HoldoverDelay::Count(delay_count))
        } else {
            None
        };
        if visitor.process.delay.is_some() {
            visitor.process.delay_service_from = Some(from);
            visitor.process.delay_origin = origin;
        }

        // Stay pinned only where the holdover service is served
        visitor.next_service = target;
        visitor.current_workplace = origin.filter(|wp| {
            st.workplaces.get(wp).is_some_and(|d| d.workplace.serves(&st.catalog, target))
        });
        visitor.clear_affinity();

        self.persist(&visitor)?;
        if let Some(wp) = origin {
            st.release_slot(wp, id);
        }
        self.update_active_visitor(st, visitor.clone(), false);
        self.log_operation(st, &visitor, from, origin)?;
        self.metrics.record_held_over();
        info!(
            visitor = %visitor,
            from = %from,
            to = %target,
            delay = ?visitor.process.delay,
            "visitor_held_over"
        );
        self.emit_visitor(st, VisitorEvent::for_visitor(&visitor, origin, "", employee));
        Ok(Some(visitor))
    }

    pub(super) fn move_to_workplace_locked(
        &self,
        st: &mut QueueState,
        id: VisitorId,
        workplace: WorkplaceId,
    ) -> EngineResult<Option<Visitor>> {
        if !st.workplaces.contains_key(&workplace) {
            return Err(EngineError::UnknownWorkplace(workplace));
        }
        let Some(mut visitor) = st.visitors.get(&id).cloned() else {
            info!(visitor = %id, "move_visitor_not_found");
            return Ok(None);
        };
        let old = visitor.current_workplace;
        let employee = old.and_then(|wp| st.employee_at(wp));

        visitor.status = VisitorStatus::MoveToWorkplace;
        visitor.complete_date = Some(self.now());
        let leaving = VisitorEvent::for_visitor(&visitor, old, "", employee);
        let served = visitor.next_service;

        visitor.current_workplace = Some(workplace);
        visitor.clear_affinity();
        self.persist(&visitor)?;
        if let Some(wp) = old {
            st.release_slot(wp, id);
        }
        self.log_operation(st, &visitor, served, old)?;
        self.emit_visitor(st, leaving);
        self.metrics.record_moved();
        info!(visitor = %visitor, from = ?old, to = %workplace, "visitor_moved_to_workplace");
        self.update_active_visitor(st, visitor.clone(), true);
        Ok(Some(visitor))
    }

    pub(super) fn move_to_service_locked(
        &self,
        st: &mut QueueState,
        id: VisitorId,
        service: ServiceId,
    ) -> EngineResult<Option<Visitor>> {
        if !st.catalog.contains(service) {
            return Err(EngineError::UnknownService(service));
        }
        self.check_queue_limit(st, Some(id))?;
        let Some(mut visitor) = st.visitors.get(&id).cloned() else {
            info!(visitor = %id, "move_visitor_not_found");
            return Ok(None);
        };
        let old = visitor.current_workplace;
        let employee = old.and_then(|wp| st.employee_at(wp));

        visitor.status = VisitorStatus::MoveToService;
        visitor.complete_date = Some(self.now());
        visitor.next_service = service;
        visitor.current_workplace = None;
        visitor.clear_affinity();
        self.persist(&visitor)?;
        if let Some(wp) = old {
            st.release_slot(wp, id);
        }
        self.log_operation(st, &visitor, service, old)?;
        self.metrics.record_moved();
        info!(visitor = %visitor, service = %service, "visitor_moved_to_service");
        self.emit_visitor(st, VisitorEvent::for_visitor(&visitor, old, "", employee));
        self.update_active_visitor(st, visitor.clone(), true);
        Ok(Some(visitor))
    }

    pub(super) fn set_arrived_locked(&self, st: &mut QueueState, id: VisitorId) -> Option<Visitor> {
        let visitor = st.visitors.get_mut(&id)?;
        visitor.process.arrived = true;
        visitor.process.suspended = false;
        let visitor = visitor.clone();
        let workplace = visitor.current_workplace;
        let employee = workplace.and_then(|wp| st.employee_at(wp));
        debug!(visitor = %visitor, "visitor_arrived");
        self.emit_visitor(
            st,
            VisitorEvent::for_visitor(&visitor, workplace, visitor.ticket_str(), employee)
                .with_arrived(true),
        );
        Some(visitor)
    }

    pub(super) fn set_suspended_locked(&self, st: &mut QueueState, id: VisitorId) -> Option<Visitor> {
        let visitor = st.visitors.get_mut(&id)?;
        visitor.process.arrived = false;
        visitor.process.suspended = true;
        let visitor = visitor.clone();
        let workplace = visitor.current_workplace;
        let employee = workplace.and_then(|wp| st.employee_at(wp));
        debug!(visitor = %visitor, "visitor_suspended");
        self.emit_visitor(st, VisitorEvent::for_visitor(&visitor, workplace, "", employee));
        Some(visitor)
    }

    pub(super) fn remove_active_visitor_locked(
        &self,
        st: &mut QueueState,
        id: VisitorId,
    ) -> Option<Visitor> {
        let visitor = st.visitors.remove(&id)?;
        for wp in st.day_order.clone() {
            st.release_slot(wp, id);
        }
        info!(visitor = %visitor, "visitor_removed_from_active_set");
        let event = match visitor.current_workplace {
            Some(wp) => VisitorEvent::blank(wp),
            None => VisitorEvent::rebuild_all(),
        };
        self.emit_visitor(st, event);
        Some(visitor)
    }
}
