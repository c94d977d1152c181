//! Day lifecycle: open/close, workplace registration, recovery of
//! interrupted calls and the daily watermark

use super::{is_eligible, DayWorkplace, QueueEngine, QueueState};
use crate::domain::visitor::RESTORE_COMMENT;
use crate::domain::{
    EmployeeId, OutboundEvent, ShiftWindow, VisitorEvent, VisitorId, Workplace, WorkplaceId,
    WorkplaceProcess, WorkplaceType,
};
use crate::infra::{EngineError, EngineResult};
use crate::services::repository::Setting;
use anyhow::Context;
use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

const WATERMARK_KEY: &str = "day_watermark";
const WATERMARK_LEN: usize = 3;

/// Windows-1251 bytes that decode to printable characters
fn watermark_alphabet() -> Vec<u8> {
    (0x21..=0x7E).chain([0xA8, 0xB8]).chain(0xC0..=0xFF).collect()
}

/// Decode Windows-1251 text limited to ASCII, Ё/ё and the Cyrillic block
pub(crate) fn decode_cp1251(bytes: &[u8]) -> EngineResult<String> {
    bytes
        .iter()
        .map(|&b| match b {
            0x20..=0x7E => Ok(char::from(b)),
            0xA8 => Ok('Ё'),
            0xB8 => Ok('ё'),
            0xC0..=0xFF => char::from_u32(0x0410 + u32::from(b - 0xC0))
                .ok_or_else(|| EngineError::Watermark(format!("byte {b:#04x}"))),
            _ => Err(EngineError::Watermark(format!("unmapped byte {b:#04x}"))),
        })
        .collect()
}

fn random_watermark<R: Rng + ?Sized>(rng: &mut R) -> Vec<u8> {
    let alphabet = watermark_alphabet();
    (0..WATERMARK_LEN).filter_map(|_| alphabet.choose(rng).copied()).collect()
}

impl QueueEngine {
    pub(super) fn start_day_locked(&self, st: &mut QueueState, on_startup: bool) -> EngineResult<bool> {
        if st.day_open || !self.config.is_serving() {
            return Ok(false);
        }
        let now = self.now();
        let Some(schedule) = st.timetable.schedule_at(now).cloned() else {
            info!("day_open_skipped_no_schedule");
            return Ok(false);
        };
        let window = schedule.window_at(now);
        let load_window = (!st.timetable.around_the_clock).then_some(window);

        self.registration.reinit();
        st.visitors.clear();
        st.workplaces.clear();
        st.day_order.clear();
        st.last_activity_check = None;

        for visitor in self.repository.open_visitors(load_window)? {
            if is_eligible(&visitor, window) {
                st.visitors.insert(visitor.id, visitor);
            }
        }

        for workplace in self.repository.workplaces()? {
            if workplace.blocked {
                debug!(workplace = %workplace, "workplace_blocked_skipped");
                continue;
            }
            self.add_day_workplace(st, workplace);
        }
        let automatic: Vec<WorkplaceId> = st
            .day_order
            .iter()
            .copied()
            .filter(|id| st.workplaces.get(id).is_some_and(|d| d.workplace.kind == WorkplaceType::Automatic))
            .collect();
        for workplace in automatic {
            self.register_employee_locked(st, None, workplace)?;
        }

        self.restore_served_counts(st, load_window)?;
        self.recover_interrupted_calls(st)?;
        if !st.timetable.around_the_clock {
            self.refresh_watermark(st, window);
        }

        if let Some(first) = st.day_order.first().copied() {
            self.emit_visitor(st, VisitorEvent::blank(first));
        }
        st.day_open = true;
        self.emit(st, OutboundEvent::OpenDay { on_startup });
        self.metrics.set_day_open(true);
        info!(
            schedule = %schedule.id,
            on_startup = %on_startup,
            visitors = %st.visitors.len(),
            workplaces = %st.day_order.len(),
            "day_opened"
        );
        Ok(true)
    }

    /// Close the day. In-memory state is dropped first; storage cleanup is
    /// best effort and never keeps the day open.
    pub(super) fn stop_day_locked(&self, st: &mut QueueState) -> bool {
        if !st.day_open || !self.config.is_serving() {
            return false;
        }
        let visitors = st.visitors.len();
        st.visitors.clear();
        st.workplaces.clear();
        st.day_order.clear();
        st.day_open = false;

        let cleanup = || -> anyhow::Result<()> {
            self.registration
                .remove_appointments_and_visitors()
                .context("removing unfinished visitors")?;
            self.registration.reinit();
            Ok(())
        };
        if let Err(e) = cleanup() {
            warn!(error = %format!("{e:#}"), "day_cleanup_failed");
        }

        self.emit(st, OutboundEvent::CloseDay);
        self.metrics.set_day_open(false);
        info!(visitors = %visitors, "day_closed");
        true
    }

    pub(super) fn add_day_workplace(&self, st: &mut QueueState, workplace: Workplace) {
        let algorithm = self.algorithm_for(st, workplace.algorithm);
        let id = workplace.id;
        st.workplaces.insert(
            id,
            DayWorkplace { workplace, process: WorkplaceProcess::default(), queue: self.new_queue(algorithm) },
        );
        if !st.day_order.contains(&id) {
            st.day_order.push(id);
        }
    }

    pub(super) fn register_employee_locked(
        &self,
        st: &mut QueueState,
        employee: Option<EmployeeId>,
        workplace: WorkplaceId,
    ) -> EngineResult<()> {
        if !st.workplaces.contains_key(&workplace) {
            return Err(EngineError::UnknownWorkplace(workplace));
        }
        self.unregister_workplace_locked(st, workplace);

        // One employee works at one workplace at a time
        if let Some(employee) = employee {
            let elsewhere: Vec<WorkplaceId> = st
                .active_workplace_ids()
                .into_iter()
                .filter(|id| *id != workplace && st.employee_at(*id) == Some(employee))
                .collect();
            for other in elsewhere {
                warn!(employee = %employee, workplace = %other, "employee_moved_off_workplace");
                self.unregister_workplace_locked(st, other);
            }
        }

        let now = self.now();
        let restored = st
            .visitors
            .values()
            .filter(|v| v.current_workplace == Some(workplace) && v.status.is_called())
            .max_by_key(|v| (v.call_date, v.id))
            .map(|v| v.id);
        let algorithm = match st.workplaces.get(&workplace) {
            Some(day) => self.algorithm_for(st, day.workplace.algorithm),
            None => return Err(EngineError::UnknownWorkplace(workplace)),
        };
        let queue = self.new_queue(algorithm);
        if let Some(day) = st.workplaces.get_mut(&workplace) {
            day.process.registered = true;
            day.process.employee = employee;
            day.process.last_active = Some(now);
            day.process.changed_at = Some(now);
            day.queue = queue;
        }
        st.set_current_visitor(workplace, restored);
        info!(
            workplace = %workplace,
            employee = ?employee,
            restored = ?restored,
            "workplace_registered"
        );

        let event = match restored.and_then(|id| st.visitors.get(&id)) {
            Some(visitor) => {
                VisitorEvent::for_visitor(visitor, Some(workplace), visitor.ticket_str(), employee)
            }
            None => VisitorEvent::blank(workplace),
        };
        self.emit_visitor(st, event);
        Ok(())
    }

    /// Take a workplace out of calling. Its called visitor, if any, stays
    /// attached and is restored at the next registration.
    pub(super) fn unregister_workplace_locked(&self, st: &mut QueueState, workplace: WorkplaceId) -> bool {
        let now = self.now();
        let Some(day) = st.workplaces.get(&workplace) else {
            debug!(workplace = %workplace, "unregister_workplace_not_in_day");
            return false;
        };
        let algorithm = self.algorithm_for(st, day.workplace.algorithm);
        let queue = self.new_queue(algorithm);
        if let Some(day) = st.workplaces.get_mut(&workplace) {
            let was_registered = day.process.registered;
            day.process.registered = false;
            day.process.employee = None;
            day.process.changed_at = Some(now);
            day.queue = queue;
            if was_registered {
                info!(workplace = %workplace, "workplace_unregistered");
            }
        }
        self.emit_visitor(st, VisitorEvent::blank(workplace));
        true
    }

    fn restore_served_counts(&self, st: &mut QueueState, window: Option<ShiftWindow>) -> EngineResult<()> {
        let operations = self.repository.served_operations(window)?;
        let mut restored = 0usize;
        for op in operations {
            let Some(day) = op.workplace.and_then(|wp| st.workplaces.get_mut(&wp)) else { continue };
            day.process.add_served(op.service);
            restored += 1;
        }
        debug!(operations = %restored, "served_counts_restored");
        Ok(())
    }

    /// Called visitors no registered workplace holds were interrupted by a
    /// restart: send them to holdover when possible, otherwise complete them
    fn recover_interrupted_calls(&self, st: &mut QueueState) -> EngineResult<()> {
        let held: FxHashSet<VisitorId> = st
            .active_workplace_ids()
            .into_iter()
            .filter_map(|wp| st.current_visitor_at(wp))
            .collect();
        let orphans: Vec<VisitorId> = st
            .ordered_visitor_ids()
            .into_iter()
            .filter(|id| !held.contains(id))
            .filter(|id| st.visitors.get(id).is_some_and(|v| v.status.is_called()))
            .collect();

        for id in orphans {
            let Some(service) = st.visitors.get(&id).map(|v| v.next_service) else { continue };
            if st.catalog.holdover_target(service).is_some() {
                self.holdover_locked(st, id, RESTORE_COMMENT, 0, 0)?;
            } else {
                self.complete_locked(st, id)?;
            }
            info!(visitor = %id, "interrupted_call_recovered");
        }
        Ok(())
    }

    /// Reuse the stored watermark while it belongs to this shift, otherwise
    /// generate a new one
    fn refresh_watermark(&self, st: &mut QueueState, window: ShiftWindow) {
        match self.repository.setting(WATERMARK_KEY) {
            Ok(Some(setting)) if window.contains(setting.at) => {
                st.watermark = setting.value;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "watermark_load_failed");
                return;
            }
        }

        let bytes = random_watermark(&mut rand::thread_rng());
        match decode_cp1251(&bytes) {
            Ok(text) => {
                let setting = Setting { value: text.clone(), at: self.now() };
                if let Err(e) = self.repository.save_setting(WATERMARK_KEY, setting) {
                    warn!(error = %e, "watermark_save_failed");
                }
                info!(watermark = %text, "watermark_generated");
                st.watermark = text;
            }
            Err(e) => {
                warn!(error = %e, "watermark_encoding_failed");
                st.watermark.clear();
            }
        }
    }
}

#[cfg(test)]
mod watermark_tests {
    use super::*;

    #[test]
    fn test_alphabet_always_decodes() {
        let alphabet = watermark_alphabet();
        let text = decode_cp1251(&alphabet).unwrap();
        assert_eq!(text.chars().count(), alphabet.len());
        assert!(text.contains('Ё'));
        assert!(text.contains('я'));
    }

    #[test]
    fn test_unmapped_byte_fails() {
        assert!(matches!(decode_cp1251(&[0x41, 0x98]), Err(EngineError::Watermark(_))));
    }

    #[test]
    fn test_random_watermark_length() {
        let bytes = random_watermark(&mut rand::thread_rng());
        assert_eq!(bytes.len(), WATERMARK_LEN);
        assert_eq!(decode_cp1251(&bytes).unwrap().chars().count(), WATERMARK_LEN);
    }
}
