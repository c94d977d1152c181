//! Queue engine: distribution, visitor lifecycle, day lifecycle and
//! appointment reconciliation over one shared in-memory state
//!
//! All mutable state lives in `QueueState` behind a single `RwLock`.
//! Public operations take the lock once and delegate to the `*_locked`
//! handlers, which work on `&mut QueueState` and may call each other
//! freely without re-locking:
//! - `distribution` - candidate lists and per-workplace queue rebuilds
//! - `lifecycle` - registration, calling, completion, holdover, moves
//! - `day` - day open/close, workplace registration, crash recovery
//! - `reconciler` - timer-driven appointment calls and holdover returns
//! - `inbound` - notifications from the rest of the system

mod day;
mod distribution;
mod inbound;
mod lifecycle;
mod reconciler;

use crate::domain::{
    Algorithm, AlgorithmId, CancelReason, EmployeeId, HoldoverDelay, OutboundEvent,
    ServiceCatalog, ServiceId, ShiftWindow, Timetable, Visitor, VisitorEvent, VisitorId,
    VisitorStatus, Workplace, WorkplaceId, WorkplaceProcess,
};
use crate::infra::{Clock, Config, EngineResult, Metrics};
use crate::io::EventSender;
use crate::services::queue::{PriorityQueue, QueuePolicy};
use crate::services::registration::Registration;
use crate::services::repository::{OperationRecord, Repository};
use chrono::NaiveDateTime;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A workplace loaded for the current day
pub(crate) struct DayWorkplace {
    pub(crate) workplace: Workplace,
    pub(crate) process: WorkplaceProcess,
    pub(crate) queue: Box<dyn QueuePolicy>,
}

/// Read-side snapshot of a day workplace
#[derive(Debug, Clone, PartialEq)]
pub struct WorkplaceView {
    pub workplace: Workplace,
    pub process: WorkplaceProcess,
    pub queue: Vec<VisitorId>,
}

impl WorkplaceView {
    fn of(day: &DayWorkplace) -> Self {
        Self {
            workplace: day.workplace.clone(),
            process: day.process.clone(),
            queue: day.queue.queue().to_vec(),
        }
    }
}

#[derive(Default)]
pub(crate) struct QueueState {
    pub(crate) day_open: bool,
    pub(crate) catalog: ServiceCatalog,
    pub(crate) timetable: Timetable,
    pub(crate) algorithms: FxHashMap<AlgorithmId, Algorithm>,
    /// Active visitors of the current shift
    pub(crate) visitors: FxHashMap<VisitorId, Visitor>,
    pub(crate) workplaces: FxHashMap<WorkplaceId, DayWorkplace>,
    /// Day list order; the most recently calling workplace comes first
    pub(crate) day_order: Vec<WorkplaceId>,
    /// Set by every visitor event, consumed by the fine tick
    pub(crate) visitor_event_flag: bool,
    pub(crate) last_activity_check: Option<NaiveDateTime>,
    pub(crate) watermark: String,
}

impl QueueState {
    /// Active visitor ids in registration order
    pub(crate) fn ordered_visitor_ids(&self) -> Vec<VisitorId> {
        let mut ids: Vec<(NaiveDateTime, VisitorId)> =
            self.visitors.values().map(|v| (v.registered_at, v.id)).collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    pub(crate) fn is_registered(&self, workplace: WorkplaceId) -> bool {
        self.workplaces.get(&workplace).is_some_and(|d| d.process.registered)
    }

    pub(crate) fn employee_at(&self, workplace: WorkplaceId) -> Option<EmployeeId> {
        self.workplaces.get(&workplace).and_then(|d| d.process.employee)
    }

    pub(crate) fn current_visitor_at(&self, workplace: WorkplaceId) -> Option<VisitorId> {
        self.workplaces.get(&workplace).and_then(|d| d.process.current_visitor)
    }

    /// Registered workplaces in day-list order
    pub(crate) fn active_workplace_ids(&self) -> Vec<WorkplaceId> {
        self.day_order.iter().copied().filter(|id| self.is_registered(*id)).collect()
    }

    /// Occupy (or free) the workplace's called slot
    pub(crate) fn set_current_visitor(&mut self, workplace: WorkplaceId, visitor: Option<VisitorId>) {
        let Some(day) = self.workplaces.get_mut(&workplace) else { return };
        day.process.current_visitor = visitor;
        if visitor.is_some() {
            if let Some(pos) = self.day_order.iter().position(|id| *id == workplace) {
                let id = self.day_order.remove(pos);
                self.day_order.insert(0, id);
            }
        }
    }

    /// Free the slot only if `visitor` holds it
    pub(crate) fn release_slot(&mut self, workplace: WorkplaceId, visitor: VisitorId) {
        if self.current_visitor_at(workplace) == Some(visitor) {
            self.set_current_visitor(workplace, None);
        }
    }

    pub(crate) fn tally_served(&mut self, workplace: Option<WorkplaceId>, service: ServiceId) {
        let Some(day) = workplace.and_then(|id| self.workplaces.get_mut(&id)) else { return };
        if day.process.registered {
            day.process.add_served(service);
        }
    }
}

/// A visitor stays active while it holds a ticket, is not completed, and
/// (for booked visitors) its parent slot lies inside the shift
pub(crate) fn is_eligible(visitor: &Visitor, window: ShiftWindow) -> bool {
    if visitor.status == VisitorStatus::Complete || visitor.ticket.is_none() {
        return false;
    }
    if !visitor.is_appointment_visitor() {
        return true;
    }
    visitor
        .parent_appointment()
        .and_then(|a| a.from)
        .is_some_and(|from| window.strictly_contains(from))
}

pub struct QueueEngine {
    state: RwLock<QueueState>,
    repository: Arc<dyn Repository>,
    registration: Arc<dyn Registration>,
    events: EventSender,
    clock: Arc<dyn Clock>,
    config: Config,
    metrics: Arc<Metrics>,
}

impl QueueEngine {
    /// Create the engine, loading reference data from the repository
    pub fn new(
        config: Config,
        repository: Arc<dyn Repository>,
        registration: Arc<dyn Registration>,
        events: EventSender,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> EngineResult<Self> {
        let catalog = ServiceCatalog::new(repository.services()?);
        let algorithms = repository.algorithms()?.into_iter().map(|a| (a.id, a)).collect();
        let state = QueueState {
            catalog,
            timetable: config.timetable().clone(),
            algorithms,
            ..QueueState::default()
        };
        info!(
            services = %state.catalog.len(),
            schedules = %state.timetable.schedules.len(),
            role = ?config.role(),
            "engine_initialized"
        );
        Ok(Self {
            state: RwLock::new(state),
            repository,
            registration,
            events,
            clock,
            config,
            metrics,
        })
    }

    /// Open the day if the current schedule is active, otherwise announce
    /// a closed day
    pub fn startup(&self) -> EngineResult<bool> {
        if !self.config.is_serving() {
            info!("engine_passive_master");
            return Ok(false);
        }
        let now = self.now();
        self.with_state(|st| {
            if st.timetable.active_schedule_at(now).is_some() {
                self.start_day_locked(st, true)
            } else {
                self.emit(st, OutboundEvent::CloseDay);
                Ok(false)
            }
        })
    }

    pub fn start_day(&self, on_startup: bool) -> EngineResult<bool> {
        self.with_state(|st| self.start_day_locked(st, on_startup))
    }

    pub fn stop_day(&self) -> bool {
        self.with_state(|st| self.stop_day_locked(st))
    }

    /// Register a new visitor, issuing a ticket if it has none
    pub fn register_visitor(&self, visitor: Visitor) -> EngineResult<Visitor> {
        let result = self.with_state(|st| self.register_locked(st, visitor));
        if result.is_err() {
            self.metrics.record_registration_rejected();
        }
        result
    }

    /// Register a walk-in visitor for `service` with a fresh id
    pub fn register_walk_in(&self, service: ServiceId) -> EngineResult<Visitor> {
        let visitor = Visitor::new(self.repository.next_visitor_id(), service, self.now());
        self.register_visitor(visitor)
    }

    pub fn call_next(&self, workplace: WorkplaceId) -> EngineResult<Option<Visitor>> {
        self.with_state(|st| self.call_next_locked(st, workplace))
    }

    pub fn call_visitor(
        &self,
        workplace: WorkplaceId,
        visitor: VisitorId,
    ) -> EngineResult<Option<Visitor>> {
        self.with_state(|st| self.call_visitor_locked(st, workplace, visitor))
    }

    pub fn complete(&self, visitor: VisitorId) -> EngineResult<Option<Visitor>> {
        self.with_state(|st| self.complete_locked(st, visitor))
    }

    pub fn cancel(
        &self,
        workplace: Option<WorkplaceId>,
        visitor: VisitorId,
        reason: CancelReason,
    ) -> EngineResult<Option<Visitor>> {
        self.with_state(|st| self.cancel_locked(st, workplace, visitor, reason))
    }

    /// Put a visitor on hold; a positive `delay_minutes` wins over `delay_count`
    pub fn holdover(
        &self,
        visitor: VisitorId,
        reason: &str,
        delay_minutes: u32,
        delay_count: u32,
    ) -> EngineResult<Option<Visitor>> {
        self.with_state(|st| self.holdover_locked(st, visitor, reason, delay_minutes, delay_count))
    }

    pub fn move_to_workplace(
        &self,
        visitor: VisitorId,
        workplace: WorkplaceId,
    ) -> EngineResult<Option<Visitor>> {
        self.with_state(|st| self.move_to_workplace_locked(st, visitor, workplace))
    }

    pub fn move_to_service(
        &self,
        visitor: VisitorId,
        service: ServiceId,
    ) -> EngineResult<Option<Visitor>> {
        self.with_state(|st| self.move_to_service_locked(st, visitor, service))
    }

    /// Log an employee into a workplace (None for automatic counters)
    pub fn register_employee(
        &self,
        employee: Option<EmployeeId>,
        workplace: WorkplaceId,
    ) -> EngineResult<()> {
        self.with_state(|st| self.register_employee_locked(st, employee, workplace))
    }

    pub fn unregister_workplace(&self, workplace: WorkplaceId) -> bool {
        self.with_state(|st| self.unregister_workplace_locked(st, workplace))
    }

    /// Dry-run rebuild of the queue of one workplace running `algorithm`
    pub fn test_algorithm(&self, algorithm: AlgorithmId, workplace: WorkplaceId) -> EngineResult<()> {
        let mut guard = self.state.write();
        self.test_algorithm_locked(&mut *guard, algorithm, workplace)
    }

    pub fn heartbeat(&self, workplace: WorkplaceId) -> bool {
        let now = self.now();
        let mut guard = self.state.write();
        match guard.workplaces.get_mut(&workplace) {
            Some(day) => {
                day.process.last_active = Some(now);
                true
            }
            None => false,
        }
    }

    pub fn set_arrived(&self, visitor: VisitorId) -> Option<Visitor> {
        self.with_state(|st| self.set_arrived_locked(st, visitor))
    }

    pub fn set_suspended(&self, visitor: VisitorId) -> Option<Visitor> {
        self.with_state(|st| self.set_suspended_locked(st, visitor))
    }

    pub fn remove_active_visitor(&self, visitor: VisitorId) -> Option<Visitor> {
        self.with_state(|st| self.remove_active_visitor_locked(st, visitor))
    }

    /// Coarse timer: day open/close, appointment calls, timed holdovers
    pub fn minute_tick(&self) {
        self.metrics.record_tick(true);
        self.with_state(|st| self.minute_tick_locked(st));
    }

    /// Fine timer: prompt appointment calls after visitor events. An idle
    /// tick leaves the queues alone.
    pub fn second_tick(&self) {
        self.metrics.record_tick(false);
        let mut guard = self.state.write();
        if !guard.visitor_event_flag {
            return;
        }
        self.second_tick_locked(&mut guard);
        self.finish(&mut guard);
    }

    // Read side

    pub fn is_day_open(&self) -> bool {
        self.state.read().day_open
    }

    pub fn watermark(&self) -> String {
        self.state.read().watermark.clone()
    }

    pub fn visitor(&self, id: VisitorId) -> Option<Visitor> {
        self.state.read().visitors.get(&id).cloned()
    }

    /// Look up an active visitor by ticket, ignoring case and separators
    pub fn find_by_ticket(&self, ticket: &str) -> Option<Visitor> {
        let wanted = normalize_ticket(ticket);
        if wanted.is_empty() {
            return None;
        }
        let st = self.state.read();
        st.visitors
            .values()
            .find(|v| v.ticket.as_deref().map(normalize_ticket).as_deref() == Some(wanted.as_str()))
            .cloned()
    }

    pub fn active_visitors(&self) -> Vec<Visitor> {
        let st = self.state.read();
        st.ordered_visitor_ids().iter().filter_map(|id| st.visitors.get(id)).cloned().collect()
    }

    /// Registered workplaces in day-list order
    pub fn active_workplaces(&self) -> Vec<WorkplaceView> {
        let st = self.state.read();
        st.active_workplace_ids()
            .iter()
            .filter_map(|id| st.workplaces.get(id))
            .map(WorkplaceView::of)
            .collect()
    }

    /// Every workplace loaded for the day, registered or not
    pub fn day_workplaces(&self) -> Vec<WorkplaceView> {
        let st = self.state.read();
        st.day_order.iter().filter_map(|id| st.workplaces.get(id)).map(WorkplaceView::of).collect()
    }

    pub fn current_visitor(&self, workplace: WorkplaceId) -> Option<Visitor> {
        let st = self.state.read();
        st.current_visitor_at(workplace).and_then(|id| st.visitors.get(&id)).cloned()
    }

    pub fn employee_at(&self, workplace: WorkplaceId) -> Option<EmployeeId> {
        self.state.read().employee_at(workplace)
    }

    pub fn workplace_by_employee(&self, employee: EmployeeId) -> Option<WorkplaceId> {
        let st = self.state.read();
        st.active_workplace_ids().into_iter().find(|id| st.employee_at(*id) == Some(employee))
    }

    pub fn queue_of(&self, workplace: WorkplaceId) -> Vec<VisitorId> {
        let st = self.state.read();
        st.workplaces.get(&workplace).map(|d| d.queue.queue().to_vec()).unwrap_or_default()
    }

    // Shared helpers for the handler modules

    fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Run a mutating operation under the write lock, then rebuild queues
    fn with_state<T>(&self, op: impl FnOnce(&mut QueueState) -> T) -> T {
        let mut guard = self.state.write();
        let out = op(&mut *guard);
        self.finish(&mut *guard);
        out
    }

    fn finish(&self, st: &mut QueueState) {
        if st.day_open {
            self.rebuild_queues_locked(st, None);
        }
        self.metrics.set_active(st.visitors.len(), st.active_workplace_ids().len());
    }

    fn shift_window(&self, st: &QueueState, now: NaiveDateTime) -> Option<ShiftWindow> {
        st.timetable.schedule_at(now).map(|s| s.window_at(now))
    }

    fn algorithm_for(&self, st: &QueueState, id: AlgorithmId) -> Algorithm {
        st.algorithms.get(&id).cloned().unwrap_or_else(|| Algorithm::new(id, "default"))
    }

    fn new_queue(&self, algorithm: Algorithm) -> Box<dyn QueuePolicy> {
        Box::new(PriorityQueue::new(algorithm))
    }

    fn persist(&self, visitor: &Visitor) -> EngineResult<()> {
        self.repository.save_visitor(visitor)?;
        Ok(())
    }

    fn log_operation(
        &self,
        st: &QueueState,
        visitor: &Visitor,
        service: ServiceId,
        workplace: Option<WorkplaceId>,
    ) -> EngineResult<()> {
        self.repository.record_operation(OperationRecord {
            visitor: visitor.id,
            status: visitor.status,
            service,
            workplace,
            employee: workplace.and_then(|wp| st.employee_at(wp)),
            at: self.now(),
        })?;
        Ok(())
    }

    /// Publish an outbound event, counting down held-over visitors first
    fn emit(&self, st: &mut QueueState, event: OutboundEvent) {
        if let OutboundEvent::Visitor(ref visitor_event) = event {
            st.visitor_event_flag = true;
            self.count_down_holdovers(st, visitor_event);
        }
        self.events.send(event);
    }

    fn emit_visitor(&self, st: &mut QueueState, event: VisitorEvent) {
        self.emit(st, OutboundEvent::Visitor(event));
    }

    /// Each finished or re-queued visitor at a workplace brings count-based
    /// holdovers that originated there one step closer to returning
    fn count_down_holdovers(&self, st: &mut QueueState, event: &VisitorEvent) {
        let (Some(source), Some(workplace), Some(status)) =
            (event.visitor, event.workplace, event.status)
        else {
            return;
        };
        if !(status.is_finished() || status.is_waiting()) {
            return;
        }

        let mut resumed = Vec::new();
        for visitor in st.visitors.values_mut() {
            if visitor.id == source
                || visitor.status != VisitorStatus::Holdover
                || visitor.process.delay_origin != Some(workplace)
            {
                continue;
            }
            if let Some(HoldoverDelay::Count(left)) = visitor.process.delay {
                let left = left.saturating_sub(1);
                if left == 0 {
                    resume_holdover(visitor);
                    resumed.push(visitor.clone());
                } else {
                    visitor.process.delay = Some(HoldoverDelay::Count(left));
                }
            }
        }

        for visitor in resumed {
            self.metrics.record_holdover_returned();
            info!(visitor = %visitor, service = %visitor.next_service, "holdover_returned_by_count");
            if let Err(e) = self.persist(&visitor) {
                warn!(visitor = %visitor.id, error = %e, "holdover_return_persist_failed");
            }
        }
    }
}

/// Send a held-over visitor back to the service it was taken from
pub(crate) fn resume_holdover(visitor: &mut Visitor) {
    if let Some(service) = visitor.process.delay_service_from {
        visitor.next_service = service;
    }
    visitor.status = VisitorStatus::StepComplete;
    visitor.process.clear_delay();
}

fn normalize_ticket(ticket: &str) -> String {
    ticket.chars().filter(|c| c.is_alphanumeric()).flat_map(char::to_uppercase).collect()
}
