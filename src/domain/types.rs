//! Shared identifiers and enums for the queue engine

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<i64>().map($name)
            }
        }
    };
}

id_newtype!(
    /// Visitor identity (stable across the visitor's whole journey)
    VisitorId
);
id_newtype!(
    /// Service counter identity
    WorkplaceId
);
id_newtype!(
    /// Service identity in the catalog
    ServiceId
);
id_newtype!(AppointmentId);
id_newtype!(EmployeeId);
id_newtype!(RoomId);
id_newtype!(
    /// Ordering policy definition identity
    AlgorithmId
);
id_newtype!(ScheduleId);

/// Visitor state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisitorStatus {
    Signup,
    CallNext,
    CallNextAuto,
    CallJump,
    StepComplete,
    Complete,
    CanceledByEmployee,
    CanceledNotArrived,
    CanceledConsulted,
    Holdover,
    MoveToWorkplace,
    MoveToService,
}

impl VisitorStatus {
    /// Visitor currently occupies a workplace reception slot
    #[inline]
    pub fn is_called(&self) -> bool {
        matches!(self, Self::CallNext | Self::CallNextAuto | Self::CallJump)
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        matches!(
            self,
            Self::CanceledByEmployee | Self::CanceledNotArrived | Self::CanceledConsulted
        )
    }

    /// Finished at a workplace: completed (fully or one step) or cancelled
    #[inline]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Complete | Self::StepComplete) || self.is_canceled()
    }

    /// Waiting again after having been at a workplace
    #[inline]
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Holdover | Self::MoveToWorkplace | Self::MoveToService)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::CallNext => "call_next",
            Self::CallNextAuto => "call_next_auto",
            Self::CallJump => "call_jump",
            Self::StepComplete => "step_complete",
            Self::Complete => "complete",
            Self::CanceledByEmployee => "canceled_by_employee",
            Self::CanceledNotArrived => "canceled_not_arrived",
            Self::CanceledConsulted => "canceled_consulted",
            Self::Holdover => "holdover",
            Self::MoveToWorkplace => "move_to_workplace",
            Self::MoveToService => "move_to_service",
        }
    }
}

impl std::fmt::Display for VisitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a visitor was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    ByEmployee,
    NotArrived,
    /// Visitor only needed a consultation; counts as served
    Consulted,
}

impl CancelReason {
    pub fn status(&self) -> VisitorStatus {
        match self {
            CancelReason::ByEmployee => VisitorStatus::CanceledByEmployee,
            CancelReason::NotArrived => VisitorStatus::CanceledNotArrived,
            CancelReason::Consulted => VisitorStatus::CanceledConsulted,
        }
    }
}

impl std::str::FromStr for CancelReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "employee" | "by_employee" => Ok(CancelReason::ByEmployee),
            "not_arrived" | "absent" => Ok(CancelReason::NotArrived),
            "consulted" => Ok(CancelReason::Consulted),
            other => Err(format!("unknown cancel reason '{other}'")),
        }
    }
}

/// Which queues a workplace takes for a given service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceMode {
    /// Walk-in queue only
    Live,
    /// Pre-booked appointments only
    Appointment,
    #[default]
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkplaceType {
    /// Human-operated counter
    #[default]
    Operator,
    /// Fully automated counter, registered without an employee
    Automatic,
}

/// Live-queue distribution policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionPolicy {
    #[default]
    Default,
    ByRoom,
    ByWorkstation,
}

impl DistributionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionPolicy::Default => "default",
            DistributionPolicy::ByRoom => "by_room",
            DistributionPolicy::ByWorkstation => "by_workstation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    #[default]
    Active,
    Confirmed,
    Overdue,
    Completed,
}

/// Node role: only serving nodes run queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    #[default]
    Serving,
    Master,
}

/// Delivery state of the SMS notification attached to a visitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    Unknown,
    Pending,
    Delivered,
    Failed,
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(DeliveryStatus::Unknown),
            "pending" => Ok(DeliveryStatus::Pending),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_called_statuses() {
        assert!(VisitorStatus::CallNext.is_called());
        assert!(VisitorStatus::CallNextAuto.is_called());
        assert!(VisitorStatus::CallJump.is_called());
        assert!(!VisitorStatus::Signup.is_called());
        assert!(!VisitorStatus::Holdover.is_called());
    }

    #[test]
    fn test_finished_and_waiting_are_disjoint() {
        let all = [
            VisitorStatus::Signup,
            VisitorStatus::CallNext,
            VisitorStatus::CallNextAuto,
            VisitorStatus::CallJump,
            VisitorStatus::StepComplete,
            VisitorStatus::Complete,
            VisitorStatus::CanceledByEmployee,
            VisitorStatus::CanceledNotArrived,
            VisitorStatus::CanceledConsulted,
            VisitorStatus::Holdover,
            VisitorStatus::MoveToWorkplace,
            VisitorStatus::MoveToService,
        ];
        for status in all {
            assert!(!(status.is_finished() && status.is_waiting()), "{status}");
            assert!(!(status.is_called() && status.is_finished()), "{status}");
        }
    }

    #[test]
    fn test_cancel_reason_from_str() {
        assert_eq!("consulted".parse::<CancelReason>().unwrap(), CancelReason::Consulted);
        assert_eq!(
            "not_arrived".parse::<CancelReason>().unwrap().status(),
            VisitorStatus::CanceledNotArrived
        );
        assert!("bogus".parse::<CancelReason>().is_err());
    }

    #[test]
    fn test_id_parse_and_display() {
        let id: VisitorId = "42".parse().unwrap();
        assert_eq!(id, VisitorId(42));
        assert_eq!(id.to_string(), "42");
    }
}
