//! Domain models - core business types of the service office
//!
//! This module contains the canonical data types used throughout the system:
//! - `Visitor` - a ticket holder moving through services
//! - `Appointment` - a pre-booked step of a visitor's sequence
//! - `Workplace` - a service counter and its runtime process state
//! - `ServiceCatalog` - the service tree with holdover/redirect routing
//! - `Timetable` - shift schedules
//! - `Algorithm` - ordering policy definitions
//! - `OutboundEvent` / `Notification` - emitted and consumed notifications

pub mod algorithm;
pub mod appointment;
pub mod events;
pub mod schedule;
pub mod service;
pub mod types;
pub mod visitor;
pub mod workplace;

// Re-export commonly used types at module level
pub use algorithm::{Algorithm, CandidateKind};
pub use appointment::Appointment;
pub use events::{ChangeType, Notification, OutboundEvent, SmsStatus, VisitorEvent};
pub use schedule::{Schedule, ShiftWindow, Timetable};
pub use service::{Service, ServiceCatalog};
pub use types::*;
pub use visitor::{HoldoverDelay, Visitor, VisitorProcess};
pub use workplace::{Workplace, WorkplaceProcess, WorkplaceService};
