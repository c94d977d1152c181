//! Persistence collaborator for visitors, workplaces and day settings
//!
//! The engine calls the repository synchronously while it holds its write
//! lock, so implementations must not call back into the engine.

use crate::domain::{
    Algorithm, AppointmentId, EmployeeId, Service, ServiceId, ShiftWindow, Visitor, VisitorId,
    VisitorStatus, Workplace, WorkplaceId,
};
use crate::infra::{Config, RepositoryError};
use chrono::NaiveDateTime;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

/// One visitor status transition, kept for served-count recovery
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRecord {
    pub visitor: VisitorId,
    pub status: VisitorStatus,
    pub service: ServiceId,
    pub workplace: Option<WorkplaceId>,
    pub employee: Option<EmployeeId>,
    pub at: NaiveDateTime,
}

impl OperationRecord {
    /// Counts toward the workplace's served tally
    pub fn is_served(&self) -> bool {
        matches!(
            self.status,
            VisitorStatus::Complete | VisitorStatus::StepComplete | VisitorStatus::CanceledConsulted
        )
    }
}

/// Keyed system setting with the moment it was last written
#[derive(Debug, Clone, PartialEq)]
pub struct Setting {
    pub value: String,
    pub at: NaiveDateTime,
}

pub trait Repository: Send + Sync {
    fn next_visitor_id(&self) -> VisitorId;

    fn save_visitor(&self, visitor: &Visitor) -> Result<(), RepositoryError>;

    fn load_visitor(&self, id: VisitorId) -> Result<Option<Visitor>, RepositoryError>;

    /// Visitors neither completed nor cancelled, optionally restricted to
    /// those registered (or booked) within `window`
    fn open_visitors(&self, window: Option<ShiftWindow>) -> Result<Vec<Visitor>, RepositoryError>;

    /// Drop every visitor that never reached a final status
    fn remove_open_visitors(&self) -> Result<usize, RepositoryError>;

    fn remove_appointment(&self, id: AppointmentId) -> Result<(), RepositoryError>;

    fn workplaces(&self) -> Result<Vec<Workplace>, RepositoryError>;

    fn save_workplace(&self, workplace: &Workplace) -> Result<(), RepositoryError>;

    fn services(&self) -> Result<Vec<Service>, RepositoryError>;

    fn algorithms(&self) -> Result<Vec<Algorithm>, RepositoryError>;

    fn record_operation(&self, operation: OperationRecord) -> Result<(), RepositoryError>;

    /// Served operations inside `window`, or all of them when None
    fn served_operations(
        &self,
        window: Option<ShiftWindow>,
    ) -> Result<Vec<OperationRecord>, RepositoryError>;

    fn setting(&self, key: &str) -> Result<Option<Setting>, RepositoryError>;

    fn save_setting(&self, key: &str, setting: Setting) -> Result<(), RepositoryError>;
}

#[derive(Default)]
struct Tables {
    visitors: FxHashMap<VisitorId, Visitor>,
    workplaces: Vec<Workplace>,
    services: Vec<Service>,
    algorithms: Vec<Algorithm>,
    operations: Vec<OperationRecord>,
    settings: FxHashMap<String, Setting>,
}

/// Process-local repository used by the daemon and the tests
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
    next_id: AtomicI64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self { tables: RwLock::new(Tables::default()), next_id: AtomicI64::new(1) }
    }

    /// Seed reference data (services, workplaces, algorithms) from config
    pub fn from_config(config: &Config) -> Self {
        let repo = Self::new();
        {
            let mut tables = repo.tables.write();
            tables.services = config.services().to_vec();
            tables.workplaces = config.workplaces().to_vec();
            tables.algorithms = config.algorithms().to_vec();
        }
        repo
    }

    pub fn with_visitor(self, visitor: Visitor) -> Self {
        self.bump_id(visitor.id);
        self.tables.write().visitors.insert(visitor.id, visitor);
        self
    }

    pub fn with_operation(self, operation: OperationRecord) -> Self {
        self.tables.write().operations.push(operation);
        self
    }

    pub fn visitor_count(&self) -> usize {
        self.tables.read().visitors.len()
    }

    pub fn operations(&self) -> Vec<OperationRecord> {
        self.tables.read().operations.clone()
    }

    fn bump_id(&self, id: VisitorId) {
        self.next_id.fetch_max(id.0 + 1, Ordering::Relaxed);
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn in_window(visitor: &Visitor, window: ShiftWindow) -> bool {
    window.contains(visitor.registered_at)
        || visitor.parent_appointment().and_then(|a| a.from).is_some_and(|from| window.contains(from))
}

fn is_open(visitor: &Visitor) -> bool {
    visitor.status != VisitorStatus::Complete && !visitor.status.is_canceled()
}

impl Repository for InMemoryRepository {
    fn next_visitor_id(&self) -> VisitorId {
        VisitorId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn save_visitor(&self, visitor: &Visitor) -> Result<(), RepositoryError> {
        self.bump_id(visitor.id);
        self.tables.write().visitors.insert(visitor.id, visitor.clone());
        Ok(())
    }

    fn load_visitor(&self, id: VisitorId) -> Result<Option<Visitor>, RepositoryError> {
        Ok(self.tables.read().visitors.get(&id).cloned())
    }

    fn open_visitors(&self, window: Option<ShiftWindow>) -> Result<Vec<Visitor>, RepositoryError> {
        let tables = self.tables.read();
        let mut visitors: Vec<Visitor> = tables
            .visitors
            .values()
            .filter(|v| is_open(v))
            .filter(|v| window.map_or(true, |w| in_window(v, w)))
            .cloned()
            .collect();
        visitors.sort_by_key(|v| (v.registered_at, v.id));
        Ok(visitors)
    }

    fn remove_open_visitors(&self) -> Result<usize, RepositoryError> {
        let mut tables = self.tables.write();
        let before = tables.visitors.len();
        tables.visitors.retain(|_, v| !is_open(v));
        let removed = before - tables.visitors.len();
        debug!(removed = %removed, "open_visitors_removed");
        Ok(removed)
    }

    fn remove_appointment(&self, id: AppointmentId) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write();
        for visitor in tables.visitors.values_mut() {
            visitor.appointments.retain(|a| a.id != id);
        }
        Ok(())
    }

    fn workplaces(&self) -> Result<Vec<Workplace>, RepositoryError> {
        Ok(self.tables.read().workplaces.clone())
    }

    fn save_workplace(&self, workplace: &Workplace) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write();
        match tables.workplaces.iter_mut().find(|w| w.id == workplace.id) {
            Some(existing) => *existing = workplace.clone(),
            None => tables.workplaces.push(workplace.clone()),
        }
        Ok(())
    }

    fn services(&self) -> Result<Vec<Service>, RepositoryError> {
        Ok(self.tables.read().services.clone())
    }

    fn algorithms(&self) -> Result<Vec<Algorithm>, RepositoryError> {
        Ok(self.tables.read().algorithms.clone())
    }

    fn record_operation(&self, operation: OperationRecord) -> Result<(), RepositoryError> {
        self.tables.write().operations.push(operation);
        Ok(())
    }

    fn served_operations(
        &self,
        window: Option<ShiftWindow>,
    ) -> Result<Vec<OperationRecord>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .operations
            .iter()
            .filter(|op| op.is_served())
            .filter(|op| window.map_or(true, |w| w.contains(op.at)))
            .cloned()
            .collect())
    }

    fn setting(&self, key: &str) -> Result<Option<Setting>, RepositoryError> {
        Ok(self.tables.read().settings.get(key).cloned())
    }

    fn save_setting(&self, key: &str, setting: Setting) -> Result<(), RepositoryError> {
        self.tables.write().settings.insert(key.to_string(), setting);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Appointment, AppointmentId};
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn op(status: VisitorStatus, at: NaiveDateTime) -> OperationRecord {
        OperationRecord {
            visitor: VisitorId(1),
            status,
            service: ServiceId(1),
            workplace: Some(WorkplaceId(1)),
            employee: None,
            at,
        }
    }

    #[test]
    fn test_seeded_from_config() {
        let repo = InMemoryRepository::from_config(&Config::default());
        assert_eq!(repo.services().unwrap().len(), 2);
        assert_eq!(repo.workplaces().unwrap().len(), 2);
        assert_eq!(repo.algorithms().unwrap().len(), 1);
    }

    #[test]
    fn test_ids_never_reuse_saved_visitors() {
        let repo = InMemoryRepository::new().with_visitor(Visitor::new(VisitorId(41), ServiceId(1), at(9, 0)));
        assert_eq!(repo.next_visitor_id(), VisitorId(42));
        assert_eq!(repo.next_visitor_id(), VisitorId(43));
    }

    #[test]
    fn test_open_visitors_filters_by_window_and_status() {
        let mut done = Visitor::new(VisitorId(2), ServiceId(1), at(9, 30));
        done.status = VisitorStatus::Complete;
        let repo = InMemoryRepository::new()
            .with_visitor(Visitor::new(VisitorId(1), ServiceId(1), at(9, 10)))
            .with_visitor(done)
            .with_visitor(Visitor::new(VisitorId(3), ServiceId(1), at(7, 0)));

        let window = ShiftWindow { begin: at(9, 0), end: at(18, 0) };
        let open: Vec<VisitorId> =
            repo.open_visitors(Some(window)).unwrap().iter().map(|v| v.id).collect();
        assert_eq!(open, vec![VisitorId(1)]);
        assert_eq!(repo.open_visitors(None).unwrap().len(), 2);
    }

    #[test]
    fn test_booked_visitor_counts_in_window_by_slot() {
        let id = VisitorId(5);
        let booked = Visitor::new(id, ServiceId(1), at(7, 0)).with_appointments(vec![
            Appointment::new(AppointmentId(1), id, ServiceId(1)).at(at(10, 0), at(10, 15)),
        ]);
        let repo = InMemoryRepository::new().with_visitor(booked);
        let window = ShiftWindow { begin: at(9, 0), end: at(18, 0) };
        assert_eq!(repo.open_visitors(Some(window)).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_open_visitors_keeps_finished() {
        let mut done = Visitor::new(VisitorId(2), ServiceId(1), at(9, 30));
        done.status = VisitorStatus::CanceledNotArrived;
        let repo = InMemoryRepository::new()
            .with_visitor(Visitor::new(VisitorId(1), ServiceId(1), at(9, 10)))
            .with_visitor(done);
        assert_eq!(repo.remove_open_visitors().unwrap(), 1);
        assert_eq!(repo.visitor_count(), 1);
    }

    #[test]
    fn test_served_operations() {
        let repo = InMemoryRepository::new()
            .with_operation(op(VisitorStatus::Complete, at(10, 0)))
            .with_operation(op(VisitorStatus::CanceledConsulted, at(11, 0)))
            .with_operation(op(VisitorStatus::CanceledNotArrived, at(11, 0)))
            .with_operation(op(VisitorStatus::Complete, at(8, 0)));
        let window = ShiftWindow { begin: at(9, 0), end: at(18, 0) };
        assert_eq!(repo.served_operations(Some(window)).unwrap().len(), 2);
        assert_eq!(repo.served_operations(None).unwrap().len(), 3);
    }

    #[test]
    fn test_settings_round_trip() {
        let repo = InMemoryRepository::new();
        assert!(repo.setting("watermark").unwrap().is_none());
        repo.save_setting("watermark", Setting { value: "ЖQ!".into(), at: at(9, 0) }).unwrap();
        assert_eq!(repo.setting("watermark").unwrap().map(|s| s.value), Some("ЖQ!".to_string()));
    }
}
