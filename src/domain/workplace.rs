//! Workplace (service counter) definitions and runtime process state

use crate::domain::service::ServiceCatalog;
use crate::domain::types::{
    AlgorithmId, EmployeeId, MaintenanceMode, RoomId, ServiceId, VisitorId, WorkplaceId,
    WorkplaceType,
};
use chrono::NaiveDateTime;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A service a workplace is configured for, with its queue mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkplaceService {
    pub service: ServiceId,
    #[serde(default)]
    pub mode: MaintenanceMode,
}

impl WorkplaceService {
    pub fn new(service: ServiceId, mode: MaintenanceMode) -> Self {
        Self { service, mode }
    }

    pub fn takes_live(&self) -> bool {
        self.mode != MaintenanceMode::Appointment
    }

    pub fn takes_appointments(&self) -> bool {
        self.mode != MaintenanceMode::Live
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workplace {
    pub id: WorkplaceId,
    pub name: String,
    #[serde(default)]
    pub kind: WorkplaceType,
    pub algorithm: AlgorithmId,
    pub services: SmallVec<[WorkplaceService; 4]>,
    #[serde(default)]
    pub room: Option<RoomId>,
    #[serde(default)]
    pub blocked: bool,
}

impl Workplace {
    pub fn new(id: WorkplaceId, name: &str, algorithm: AlgorithmId) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind: WorkplaceType::Operator,
            algorithm,
            services: SmallVec::new(),
            room: None,
            blocked: false,
        }
    }

    pub fn with_service(mut self, service: ServiceId, mode: MaintenanceMode) -> Self {
        self.services.push(WorkplaceService::new(service, mode));
        self
    }

    pub fn with_room(mut self, room: RoomId) -> Self {
        self.room = Some(room);
        self
    }

    pub fn with_kind(mut self, kind: WorkplaceType) -> Self {
        self.kind = kind;
        self
    }

    /// Serves `service` directly or through one of its ancestors
    pub fn serves(&self, catalog: &ServiceCatalog, service: ServiceId) -> bool {
        self.services.iter().any(|ws| catalog.is_child_or_equal(service, ws.service))
    }

    /// Serves `service` from the walk-in queue
    pub fn serves_live(&self, catalog: &ServiceCatalog, service: ServiceId) -> bool {
        self.services
            .iter()
            .any(|ws| ws.takes_live() && catalog.is_child_or_equal(service, ws.service))
    }

    /// Serves `service` for appointment visitors
    pub fn serves_appointments(&self, catalog: &ServiceCatalog, service: ServiceId) -> bool {
        self.services
            .iter()
            .any(|ws| ws.takes_appointments() && catalog.is_child_or_equal(service, ws.service))
    }
}

impl std::fmt::Display for Workplace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Runtime-only state of a workplace for the current shift
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkplaceProcess {
    /// Registered for calling (employee logged in, or automatic counter started)
    pub registered: bool,
    pub employee: Option<EmployeeId>,
    /// Non-empty only while that visitor holds a called status
    pub current_visitor: Option<VisitorId>,
    pub served: FxHashMap<ServiceId, u32>,
    pub last_active: Option<NaiveDateTime>,
    pub changed_at: Option<NaiveDateTime>,
}

impl WorkplaceProcess {
    pub fn add_served(&mut self, service: ServiceId) {
        *self.served.entry(service).or_insert(0) += 1;
    }

    pub fn served_count(&self, service: ServiceId) -> u32 {
        self.served.get(&service).copied().unwrap_or(0)
    }

    pub fn served_total(&self) -> u32 {
        self.served.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::service::Service;

    #[test]
    fn test_serves_through_parent() {
        let catalog = ServiceCatalog::new([
            Service::new(ServiceId(1), "parent"),
            Service::new(ServiceId(2), "child").with_parent(ServiceId(1)),
        ]);
        let wp = Workplace::new(WorkplaceId(1), "W1", AlgorithmId(1))
            .with_service(ServiceId(1), MaintenanceMode::Live);
        assert!(wp.serves(&catalog, ServiceId(2)));
        assert!(wp.serves_live(&catalog, ServiceId(2)));
        assert!(!wp.serves_appointments(&catalog, ServiceId(2)));
    }

    #[test]
    fn test_served_tally() {
        let mut process = WorkplaceProcess::default();
        process.add_served(ServiceId(3));
        process.add_served(ServiceId(3));
        process.add_served(ServiceId(4));
        assert_eq!(process.served_count(ServiceId(3)), 2);
        assert_eq!(process.served_count(ServiceId(5)), 0);
        assert_eq!(process.served_total(), 3);
    }
}
