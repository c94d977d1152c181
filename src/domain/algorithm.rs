//! Ordering policy definitions assigned to workplaces

use crate::domain::types::AlgorithmId;
use serde::{Deserialize, Serialize};

/// The five candidate lists built for every workplace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    /// Appointment-bound visitors for this workplace
    Appointment,
    /// Visitors pinned to this exact workplace
    Pinned,
    /// Held-over visitors pinned to this workplace
    HoldoverPinned,
    /// Held-over visitors routable to this workplace's services
    Holdover,
    /// Unassigned walk-in visitors
    Free,
}

impl CandidateKind {
    pub const ALL: [CandidateKind; 5] = [
        CandidateKind::Appointment,
        CandidateKind::Pinned,
        CandidateKind::HoldoverPinned,
        CandidateKind::Holdover,
        CandidateKind::Free,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateKind::Appointment => "appointment",
            CandidateKind::Pinned => "pinned",
            CandidateKind::HoldoverPinned => "holdover_pinned",
            CandidateKind::Holdover => "holdover",
            CandidateKind::Free => "free",
        }
    }
}

impl std::str::FromStr for CandidateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CandidateKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown candidate list '{s}'"))
    }
}

/// Named ordering policy: which candidate lists are called first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Algorithm {
    pub id: AlgorithmId,
    pub name: String,
    /// List priority, highest first. Kinds left out are appended in default order.
    #[serde(default = "default_priority")]
    pub priority: Vec<CandidateKind>,
}

fn default_priority() -> Vec<CandidateKind> {
    CandidateKind::ALL.to_vec()
}

impl Algorithm {
    pub fn new(id: AlgorithmId, name: &str) -> Self {
        Self { id, name: name.to_string(), priority: default_priority() }
    }

    pub fn with_priority(mut self, priority: Vec<CandidateKind>) -> Self {
        self.priority = priority;
        self
    }

    /// Full priority order with every kind present exactly once
    pub fn effective_priority(&self) -> Vec<CandidateKind> {
        let mut order: Vec<CandidateKind> = Vec::with_capacity(CandidateKind::ALL.len());
        for kind in self.priority.iter().chain(CandidateKind::ALL.iter()) {
            if !order.contains(kind) {
                order.push(*kind);
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_priority_fills_missing_kinds() {
        let alg = Algorithm::new(AlgorithmId(1), "free first")
            .with_priority(vec![CandidateKind::Free, CandidateKind::Free]);
        let order = alg.effective_priority();
        assert_eq!(order.len(), 5);
        assert_eq!(order[0], CandidateKind::Free);
        assert_eq!(order[1], CandidateKind::Appointment);
    }

    #[test]
    fn test_candidate_kind_from_str() {
        assert_eq!("holdover_pinned".parse::<CandidateKind>().unwrap(), CandidateKind::HoldoverPinned);
        assert!("vip".parse::<CandidateKind>().is_err());
    }
}
