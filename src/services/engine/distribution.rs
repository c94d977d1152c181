//! Candidate list construction and per-workplace queue rebuilds

use super::{QueueEngine, QueueState};
use crate::domain::{
    AlgorithmId, DistributionPolicy, ServiceCatalog, ServiceId, Visitor, VisitorId,
    VisitorStatus, Workplace, WorkplaceId, WorkplaceType,
};
use crate::infra::{EngineError, EngineResult};
use crate::services::queue::{CandidateLists, QueueParams};
use rustc_hash::FxHashMap;
use std::time::Instant;
use tracing::{debug, warn};

/// Waiting visitors bucketed by service or workplace
#[derive(Default)]
pub(super) struct Buckets {
    /// Walk-ins, under every service of their lineage
    free: FxHashMap<ServiceId, Vec<VisitorId>>,
    /// Unpinned holdovers, under every service of their lineage
    holdover: FxHashMap<ServiceId, Vec<VisitorId>>,
    pinned: FxHashMap<WorkplaceId, Vec<VisitorId>>,
    appointment: FxHashMap<WorkplaceId, Vec<VisitorId>>,
    holdover_pinned: FxHashMap<WorkplaceId, Vec<VisitorId>>,
    /// Appointment visitors by service, used when any free workplace may call them
    service_appointment: FxHashMap<ServiceId, Vec<VisitorId>>,
}

fn push<K: std::hash::Hash + Eq>(map: &mut FxHashMap<K, Vec<VisitorId>>, key: K, id: VisitorId) {
    map.entry(key).or_default().push(id);
}

impl Buckets {
    pub(super) fn collect(st: &QueueState, since: chrono::NaiveDateTime, free_call: bool) -> Self {
        let mut buckets = Buckets::default();
        for id in st.ordered_visitor_ids() {
            let Some(visitor) = st.visitors.get(&id) else { continue };
            if visitor.status.is_called() {
                continue;
            }
            let holdover = visitor.status == VisitorStatus::Holdover;
            match (visitor.current_workplace, holdover) {
                (None, false) => {
                    for service in st.catalog.lineage(visitor.next_service) {
                        push(&mut buckets.free, service, id);
                    }
                }
                (None, true) => {
                    for service in st.catalog.lineage(visitor.next_service) {
                        push(&mut buckets.holdover, service, id);
                    }
                }
                (Some(wp), true) => push(&mut buckets.holdover_pinned, wp, id),
                (Some(wp), false) => {
                    if visitor.current_service_appointment(since).is_none() {
                        push(&mut buckets.pinned, wp, id);
                    } else {
                        push(&mut buckets.appointment, wp, id);
                        if free_call {
                            push(&mut buckets.service_appointment, visitor.next_service, id);
                        }
                    }
                }
            }
        }
        buckets
    }

    pub(super) fn lists_for(
        &self,
        workplace: &Workplace,
        catalog: &ServiceCatalog,
        visitors: &FxHashMap<VisitorId, Visitor>,
        policy: DistributionPolicy,
        free_call: bool,
    ) -> CandidateLists {
        let mut lists = CandidateLists::default();

        for ws in &workplace.services {
            if ws.takes_live() {
                if let Some(ids) = self.free.get(&ws.service) {
                    lists.free.extend(
                        ids.iter()
                            .filter(|id| visitors.get(*id).is_some_and(|v| admits(workplace, v, policy))),
                    );
                }
            }
            if let Some(ids) = self.holdover.get(&ws.service) {
                lists.holdover.extend(ids.iter().copied());
            }
            if free_call && ws.takes_appointments() {
                for (service, ids) in &self.service_appointment {
                    if catalog.is_child_or_equal(*service, ws.service) {
                        lists.appointment.extend(ids.iter().copied());
                    }
                }
            }
        }

        if let Some(ids) = self.pinned.get(&workplace.id) {
            lists.pinned.extend(ids.iter().copied());
        }
        if !free_call {
            if let Some(ids) = self.appointment.get(&workplace.id) {
                lists.appointment.extend(ids.iter().copied());
            }
        }
        if let Some(ids) = self.holdover_pinned.get(&workplace.id) {
            lists.holdover_pinned.extend(ids.iter().copied());
        }

        // Holdovers pinned elsewhere may be taken by any workplace serving
        // their current service
        for (other, ids) in &self.holdover_pinned {
            if *other == workplace.id {
                continue;
            }
            lists.holdover.extend(ids.iter().copied().filter(|id| {
                visitors.get(id).is_some_and(|v| workplace.serves(catalog, v.next_service))
            }));
        }

        // A workplace serving both a parent and its child service sees the
        // same visitor under each
        lists.dedup();
        lists
    }
}

/// Room / workstation affinity filter for the free list. Plain operator
/// counters take any walk-in; only automatic workstations honour affinity.
fn admits(workplace: &Workplace, visitor: &Visitor, policy: DistributionPolicy) -> bool {
    if workplace.kind == WorkplaceType::Operator {
        return true;
    }
    match policy {
        DistributionPolicy::Default => true,
        DistributionPolicy::ByRoom => match (visitor.desired_room, workplace.room) {
            (Some(wanted), Some(room)) => wanted == room,
            _ => true,
        },
        DistributionPolicy::ByWorkstation => {
            visitor.desired_workplace.map_or(true, |wanted| wanted == workplace.id)
        }
    }
}

impl QueueEngine {
    /// Rebuild the queue of every active workplace.
    ///
    /// With `only`, a dry run that touches just the workplace matching the
    /// given algorithm and id; returns whether it was found.
    pub(super) fn rebuild_queues_locked(
        &self,
        st: &mut QueueState,
        only: Option<(AlgorithmId, WorkplaceId)>,
    ) -> bool {
        let start = Instant::now();

        let now = self.now();
        let free_call = self.config.free_workplace_call();
        let since = if free_call {
            self.shift_window(st, now).map_or(now, |w| w.begin)
        } else {
            now
        };
        let policy = self.config.distribution();
        let buckets = Buckets::collect(st, since, free_call);

        let mut matched = false;
        for wp in st.day_order.clone() {
            let Some(day) = st.workplaces.get(&wp) else { continue };
            let active = day.process.registered;
            if let Some((algorithm, target)) = only {
                if !active || wp != target || day.workplace.algorithm != algorithm {
                    continue;
                }
                matched = true;
            }

            let lists = if active {
                buckets.lists_for(&day.workplace, &st.catalog, &st.visitors, policy, free_call)
            } else {
                CandidateLists::default()
            };
            let params = QueueParams {
                max_visitors: self.config.max_visitor_queue(),
                debug: self.config.debug(),
                active,
                test: only.is_some(),
            };
            if let Some(day) = st.workplaces.get_mut(&wp) {
                day.queue.update_queue(lists, &st.visitors, params);
            }
        }

        self.metrics.record_rebuild(start.elapsed().as_micros() as u64);
        matched
    }

    pub(super) fn test_algorithm_locked(
        &self,
        st: &mut QueueState,
        algorithm: AlgorithmId,
        workplace: WorkplaceId,
    ) -> EngineResult<()> {
        if self.rebuild_queues_locked(st, Some((algorithm, workplace))) {
            debug!(algorithm = %algorithm, workplace = %workplace, "algorithm_tested");
            Ok(())
        } else {
            warn!(algorithm = %algorithm, workplace = %workplace, "algorithm_test_no_workplace");
            Err(EngineError::NoMatchingWorkplace { algorithm, workplace })
        }
    }
}
