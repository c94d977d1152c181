//! Notifications produced and consumed by the queue engine

use crate::domain::algorithm::Algorithm;
use crate::domain::schedule::Schedule;
use crate::domain::types::{
    DeliveryStatus, EmployeeId, ServiceId, VisitorId, VisitorStatus, WorkplaceId,
};
use crate::domain::visitor::Visitor;
use crate::domain::workplace::Workplace;
use serde::Serialize;

/// Display/queue notification about a visitor or workplace.
///
/// - `workplace == None`: every queue must be rebuilt
/// - `visitor == None` with a workplace: that workplace's display is blank
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitorEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visitor: Option<VisitorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<VisitorStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workplace: Option<WorkplaceId>,
    /// Ticket text shown on displays; empty hides it
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee: Option<EmployeeId>,
    pub arrived: bool,
}

impl VisitorEvent {
    pub fn for_visitor(
        visitor: &Visitor,
        workplace: Option<WorkplaceId>,
        text: &str,
        employee: Option<EmployeeId>,
    ) -> Self {
        Self {
            visitor: Some(visitor.id),
            status: Some(visitor.status),
            service: Some(visitor.next_service),
            workplace,
            text: text.to_string(),
            employee,
            arrived: false,
        }
    }

    pub fn blank(workplace: WorkplaceId) -> Self {
        Self {
            visitor: None,
            status: None,
            service: None,
            workplace: Some(workplace),
            text: String::new(),
            employee: None,
            arrived: false,
        }
    }

    pub fn rebuild_all() -> Self {
        Self {
            visitor: None,
            status: None,
            service: None,
            workplace: None,
            text: String::new(),
            employee: None,
            arrived: false,
        }
    }

    pub fn with_arrived(mut self, arrived: bool) -> Self {
        self.arrived = arrived;
        self
    }

    pub fn is_rebuild_all(&self) -> bool {
        self.workplace.is_none()
    }

    pub fn is_blank(&self) -> bool {
        self.visitor.is_none() && self.workplace.is_some()
    }
}

/// Everything the engine emits
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum OutboundEvent {
    OpenDay { on_startup: bool },
    CloseDay,
    Visitor(VisitorEvent),
}

impl OutboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::OpenDay { .. } => "open_day",
            OutboundEvent::CloseDay => "close_day",
            OutboundEvent::Visitor(_) => "visitor",
        }
    }
}

/// Kind of change reported for a workplace definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Add,
    Change,
    Unlock,
    Lock,
    Remove,
}

/// Delivery confirmation for one visitor's SMS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmsStatus {
    pub visitor: VisitorId,
    pub status: DeliveryStatus,
}

/// Notifications consumed from the rest of the system
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ScheduleChanged(Schedule),
    /// Hot-swap an ordering policy; `workplace` additionally targets one workplace
    AlgorithmChanged { algorithm: Algorithm, workplace: Option<WorkplaceId> },
    WorkplaceChanged { change: ChangeType, workplace: Workplace },
    SmsDeliveryStatus(Vec<SmsStatus>),
    AppointmentVisitorUpdate(Visitor),
    AppointmentVisitorRemove(VisitorId),
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::ScheduleChanged(_) => "schedule_changed",
            Notification::AlgorithmChanged { .. } => "algorithm_changed",
            Notification::WorkplaceChanged { .. } => "workplace_changed",
            Notification::SmsDeliveryStatus(_) => "sms_delivery_status",
            Notification::AppointmentVisitorUpdate(_) => "appointment_visitor_update",
            Notification::AppointmentVisitorRemove(_) => "appointment_visitor_remove",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_shapes() {
        assert!(VisitorEvent::rebuild_all().is_rebuild_all());
        let blank = VisitorEvent::blank(WorkplaceId(3));
        assert!(blank.is_blank());
        assert!(!blank.is_rebuild_all());
    }

    #[test]
    fn test_outbound_event_json_tag() {
        let json = serde_json::to_string(&OutboundEvent::OpenDay { on_startup: true }).unwrap();
        assert_eq!(json, r#"{"t":"open_day","on_startup":true}"#);
    }
}
