//! Service definitions and the service tree
//!
//! Services form a tree through `parent`. A workplace configured for a
//! service also serves every descendant of it, at any depth. Holdover and
//! auto-redirect routing are attached per service.

use crate::domain::types::ServiceId;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use smallvec::SmallVec;

/// Immutable reference data for one service
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    /// Ticket prefix, e.g. "A" for tickets A001, A002...
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub parent: Option<ServiceId>,
    /// Service a visitor is routed to when held over from this one
    #[serde(default)]
    pub holdover_to: Option<ServiceId>,
    /// Service a visitor is silently re-queued to after completing this one
    #[serde(default)]
    pub auto_redirect_to: Option<ServiceId>,
    /// Typical reception time, used for wait estimates
    #[serde(default = "default_routine_minutes")]
    pub routine_minutes: u32,
}

fn default_routine_minutes() -> u32 {
    10
}

impl Service {
    pub fn new(id: ServiceId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            prefix: String::new(),
            parent: None,
            holdover_to: None,
            auto_redirect_to: None,
            routine_minutes: default_routine_minutes(),
        }
    }

    pub fn with_parent(mut self, parent: ServiceId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_holdover_to(mut self, target: ServiceId) -> Self {
        self.holdover_to = Some(target);
        self
    }

    pub fn with_auto_redirect_to(mut self, target: ServiceId) -> Self {
        self.auto_redirect_to = Some(target);
        self
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }
}

/// Service id plus all of its ancestors, nearest first
pub type Lineage = SmallVec<[ServiceId; 4]>;

/// Lookup table over the service tree
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    services: FxHashMap<ServiceId, Service>,
}

impl ServiceCatalog {
    pub fn new(services: impl IntoIterator<Item = Service>) -> Self {
        Self { services: services.into_iter().map(|s| (s.id, s)).collect() }
    }

    pub fn insert(&mut self, service: Service) {
        self.services.insert(service.id, service);
    }

    pub fn get(&self, id: ServiceId) -> Option<&Service> {
        self.services.get(&id)
    }

    pub fn contains(&self, id: ServiceId) -> bool {
        self.services.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Display name, falling back to the numeric id for unknown services
    pub fn name(&self, id: ServiceId) -> String {
        self.services.get(&id).map(|s| s.name.clone()).unwrap_or_else(|| format!("SERVICE_{id}"))
    }

    /// The service itself followed by its ancestors.
    ///
    /// The walk stops at a missing parent or when a cycle would repeat a
    /// node, so malformed catalogs cannot loop forever.
    pub fn lineage(&self, id: ServiceId) -> Lineage {
        let mut lineage: Lineage = SmallVec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if lineage.contains(&current) {
                break;
            }
            lineage.push(current);
            cursor = self.services.get(&current).and_then(|s| s.parent);
        }
        lineage
    }

    /// True if `service` is `ancestor` or lies anywhere beneath it
    pub fn is_child_or_equal(&self, service: ServiceId, ancestor: ServiceId) -> bool {
        self.lineage(service).contains(&ancestor)
    }

    pub fn holdover_target(&self, id: ServiceId) -> Option<ServiceId> {
        self.services.get(&id).and_then(|s| s.holdover_to)
    }

    pub fn auto_redirect_target(&self, id: ServiceId) -> Option<ServiceId> {
        self.services.get(&id).and_then(|s| s.auto_redirect_to)
    }

    pub fn routine_minutes(&self, id: ServiceId) -> u32 {
        self.services.get(&id).map(|s| s.routine_minutes).unwrap_or_else(default_routine_minutes)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> ServiceCatalog {
        ServiceCatalog::new([
            Service::new(ServiceId(1), "Passports"),
            Service::new(ServiceId(2), "Foreign passport").with_parent(ServiceId(1)),
            Service::new(ServiceId(3), "Biometric").with_parent(ServiceId(2)),
            Service::new(ServiceId(4), "Biometric child").with_parent(ServiceId(3)),
            Service::new(ServiceId(9), "Vehicles"),
        ])
    }

    #[test]
    fn test_lineage_walks_to_root() {
        let catalog = tree();
        assert_eq!(
            catalog.lineage(ServiceId(3)).as_slice(),
            &[ServiceId(3), ServiceId(2), ServiceId(1)]
        );
        assert_eq!(catalog.lineage(ServiceId(9)).as_slice(), &[ServiceId(9)]);
    }

    #[test]
    fn test_is_child_or_equal() {
        let catalog = tree();
        assert!(catalog.is_child_or_equal(ServiceId(3), ServiceId(3)));
        assert!(catalog.is_child_or_equal(ServiceId(3), ServiceId(1)));
        assert!(!catalog.is_child_or_equal(ServiceId(1), ServiceId(3)));
        assert!(!catalog.is_child_or_equal(ServiceId(3), ServiceId(9)));
    }

    #[test]
    fn test_no_depth_limit() {
        // Three hops up: beyond the old parent/grandparent limit
        let catalog = tree();
        assert!(catalog.is_child_or_equal(ServiceId(4), ServiceId(1)));
    }

    #[test]
    fn test_cycle_terminates() {
        let catalog = ServiceCatalog::new([
            Service::new(ServiceId(1), "a").with_parent(ServiceId(2)),
            Service::new(ServiceId(2), "b").with_parent(ServiceId(1)),
        ]);
        assert_eq!(catalog.lineage(ServiceId(1)).len(), 2);
        assert!(!catalog.is_child_or_equal(ServiceId(1), ServiceId(7)));
    }

    #[test]
    fn test_unknown_service_lineage_is_itself() {
        let catalog = tree();
        assert_eq!(catalog.lineage(ServiceId(77)).as_slice(), &[ServiceId(77)]);
        assert_eq!(catalog.name(ServiceId(77)), "SERVICE_77");
    }
}
