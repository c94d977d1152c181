//! Per-workplace candidate queue and its ordering policy
//!
//! The distribution engine builds five candidate lists for every active
//! workplace and hands them to the workplace's `QueuePolicy`, which decides
//! the calling order.

use crate::domain::{Algorithm, CandidateKind, Visitor, VisitorId};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

/// Candidate lists collected for one workplace during a rebuild
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateLists {
    pub appointment: Vec<VisitorId>,
    pub pinned: Vec<VisitorId>,
    pub holdover_pinned: Vec<VisitorId>,
    pub holdover: Vec<VisitorId>,
    pub free: Vec<VisitorId>,
}

impl CandidateLists {
    pub fn get(&self, kind: CandidateKind) -> &[VisitorId] {
        match kind {
            CandidateKind::Appointment => &self.appointment,
            CandidateKind::Pinned => &self.pinned,
            CandidateKind::HoldoverPinned => &self.holdover_pinned,
            CandidateKind::Holdover => &self.holdover,
            CandidateKind::Free => &self.free,
        }
    }

    pub fn total(&self) -> usize {
        CandidateKind::ALL.iter().map(|k| self.get(*k).len()).sum()
    }

    /// Drop repeated ids within each list, keeping the first occurrence
    pub fn dedup(&mut self) {
        for list in [
            &mut self.appointment,
            &mut self.pinned,
            &mut self.holdover_pinned,
            &mut self.holdover,
            &mut self.free,
        ] {
            let mut seen = FxHashSet::default();
            list.retain(|id| seen.insert(*id));
        }
    }
}

/// Flags for one queue update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueParams {
    /// Longest queue kept; 0 keeps everything
    pub max_visitors: usize,
    pub debug: bool,
    /// Workplace is registered for calling; inactive queues stay empty
    pub active: bool,
    /// Dry run of an algorithm change
    pub test: bool,
}

pub trait QueuePolicy: Send + Sync {
    fn update_queue(
        &mut self,
        lists: CandidateLists,
        visitors: &FxHashMap<VisitorId, Visitor>,
        params: QueueParams,
    );

    /// Take the next visitor to call, removing it from the queue
    fn next_for_call(&mut self) -> Option<VisitorId>;

    /// Remember the visitor served last at this workplace
    fn set_prev_visitor(&mut self, visitor: VisitorId);

    fn update_algorithm(&mut self, algorithm: Algorithm);

    fn algorithm(&self) -> &Algorithm;

    fn queue(&self) -> &[VisitorId];

    fn len(&self) -> usize {
        self.queue().len()
    }

    fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }
}

/// Orders by the algorithm's list priority, then by list-specific time
/// (booked slot for appointments, registration time otherwise)
pub struct PriorityQueue {
    algorithm: Algorithm,
    queue: Vec<VisitorId>,
    prev_visitor: Option<VisitorId>,
}

impl PriorityQueue {
    pub fn new(algorithm: Algorithm) -> Self {
        Self { algorithm, queue: Vec::new(), prev_visitor: None }
    }

    pub fn prev_visitor(&self) -> Option<VisitorId> {
        self.prev_visitor
    }
}

fn sort_list(kind: CandidateKind, ids: &mut [VisitorId], visitors: &FxHashMap<VisitorId, Visitor>) {
    ids.sort_by_key(|id| {
        let visitor = visitors.get(id);
        let slot = match kind {
            CandidateKind::Appointment => {
                visitor.and_then(|v| v.current_appointment()).and_then(|a| a.from)
            }
            _ => None,
        };
        (slot, visitor.map(|v| v.registered_at), *id)
    });
}

impl QueuePolicy for PriorityQueue {
    fn update_queue(
        &mut self,
        mut lists: CandidateLists,
        visitors: &FxHashMap<VisitorId, Visitor>,
        params: QueueParams,
    ) {
        self.queue.clear();
        if !params.active {
            return;
        }

        let mut seen = FxHashSet::default();
        for kind in self.algorithm.effective_priority() {
            let ids = match kind {
                CandidateKind::Appointment => &mut lists.appointment,
                CandidateKind::Pinned => &mut lists.pinned,
                CandidateKind::HoldoverPinned => &mut lists.holdover_pinned,
                CandidateKind::Holdover => &mut lists.holdover,
                CandidateKind::Free => &mut lists.free,
            };
            sort_list(kind, ids, visitors);
            for id in ids.iter() {
                if seen.insert(*id) {
                    self.queue.push(*id);
                }
            }
        }

        if params.max_visitors > 0 && self.queue.len() > params.max_visitors {
            self.queue.truncate(params.max_visitors);
        }

        if params.debug || params.test {
            debug!(
                algorithm = %self.algorithm.id,
                test = %params.test,
                queue = ?self.queue,
                prev = ?self.prev_visitor,
                "queue_updated"
            );
        }
    }

    fn next_for_call(&mut self) -> Option<VisitorId> {
        if self.queue.is_empty() {
            return None;
        }
        Some(self.queue.remove(0))
    }

    fn set_prev_visitor(&mut self, visitor: VisitorId) {
        self.prev_visitor = Some(visitor);
    }

    fn update_algorithm(&mut self, algorithm: Algorithm) {
        self.algorithm = algorithm;
    }

    fn algorithm(&self) -> &Algorithm {
        &self.algorithm
    }

    fn queue(&self) -> &[VisitorId] {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlgorithmId, ServiceId};
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn visitors(specs: &[(i64, u32)]) -> FxHashMap<VisitorId, Visitor> {
        specs
            .iter()
            .map(|(id, minute)| (VisitorId(*id), Visitor::new(VisitorId(*id), ServiceId(1), at(9, *minute))))
            .collect()
    }

    fn active() -> QueueParams {
        QueueParams { active: true, ..QueueParams::default() }
    }

    #[test]
    fn test_default_priority_then_registration_order() {
        let table = visitors(&[(1, 10), (2, 5), (3, 1)]);
        let mut queue = PriorityQueue::new(Algorithm::new(AlgorithmId(1), "default"));
        let lists = CandidateLists {
            pinned: vec![VisitorId(1)],
            free: vec![VisitorId(2), VisitorId(3)],
            ..CandidateLists::default()
        };
        queue.update_queue(lists, &table, active());
        assert_eq!(queue.queue(), &[VisitorId(1), VisitorId(3), VisitorId(2)]);
    }

    #[test]
    fn test_custom_priority_puts_free_first() {
        let table = visitors(&[(1, 10), (2, 5)]);
        let algorithm = Algorithm::new(AlgorithmId(2), "walk-in first")
            .with_priority(vec![CandidateKind::Free]);
        let mut queue = PriorityQueue::new(algorithm);
        let lists = CandidateLists {
            pinned: vec![VisitorId(1)],
            free: vec![VisitorId(2)],
            ..CandidateLists::default()
        };
        queue.update_queue(lists, &table, active());
        assert_eq!(queue.queue(), &[VisitorId(2), VisitorId(1)]);
    }

    #[test]
    fn test_duplicates_keep_highest_priority_slot() {
        let table = visitors(&[(1, 1), (2, 2)]);
        let mut queue = PriorityQueue::new(Algorithm::new(AlgorithmId(1), "default"));
        let lists = CandidateLists {
            pinned: vec![VisitorId(2)],
            free: vec![VisitorId(1), VisitorId(2), VisitorId(2)],
            ..CandidateLists::default()
        };
        queue.update_queue(lists, &table, active());
        assert_eq!(queue.queue(), &[VisitorId(2), VisitorId(1)]);
    }

    #[test]
    fn test_dedup_keeps_first_occurrence_per_list() {
        let mut lists = CandidateLists {
            free: vec![VisitorId(3), VisitorId(1), VisitorId(3)],
            holdover: vec![VisitorId(2), VisitorId(2)],
            pinned: vec![VisitorId(3)],
            ..CandidateLists::default()
        };
        lists.dedup();
        assert_eq!(lists.free, vec![VisitorId(3), VisitorId(1)]);
        assert_eq!(lists.holdover, vec![VisitorId(2)]);
        // Lists are deduplicated independently
        assert_eq!(lists.pinned, vec![VisitorId(3)]);
        assert_eq!(lists.total(), 4);
    }

    #[test]
    fn test_cap_truncates() {
        let table = visitors(&[(1, 1), (2, 2), (3, 3)]);
        let mut queue = PriorityQueue::new(Algorithm::new(AlgorithmId(1), "default"));
        let lists = CandidateLists {
            free: vec![VisitorId(1), VisitorId(2), VisitorId(3)],
            ..CandidateLists::default()
        };
        queue.update_queue(lists, &table, QueueParams { max_visitors: 2, ..active() });
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_inactive_workplace_has_empty_queue() {
        let table = visitors(&[(1, 1)]);
        let mut queue = PriorityQueue::new(Algorithm::new(AlgorithmId(1), "default"));
        let lists = CandidateLists { free: vec![VisitorId(1)], ..CandidateLists::default() };
        queue.update_queue(lists, &table, QueueParams::default());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_next_for_call_pops_front() {
        let table = visitors(&[(1, 1), (2, 2)]);
        let mut queue = PriorityQueue::new(Algorithm::new(AlgorithmId(1), "default"));
        let lists = CandidateLists {
            free: vec![VisitorId(2), VisitorId(1)],
            ..CandidateLists::default()
        };
        queue.update_queue(lists, &table, active());
        assert_eq!(queue.next_for_call(), Some(VisitorId(1)));
        assert_eq!(queue.next_for_call(), Some(VisitorId(2)));
        assert_eq!(queue.next_for_call(), None);
    }
}
