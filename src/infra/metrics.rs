//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics so recording never contends with the engine lock.
//! Reporting is the only operation that resets anything (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries for queue rebuild latency (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    visitors_registered: AtomicU64,
    registrations_rejected: AtomicU64,
    visitors_called: AtomicU64,
    visitors_completed: AtomicU64,
    visitors_cancelled: AtomicU64,
    visitors_held_over: AtomicU64,
    visitors_moved: AtomicU64,
    /// Holdovers returned to the queue (time or count expiry)
    holdovers_returned: AtomicU64,
    /// Appointment visitors called or completed by the reconciler
    appointments_auto: AtomicU64,
    /// Operator workplaces dropped by the liveness sweep
    workplaces_stale: AtomicU64,
    /// Total queue rebuilds (monotonic)
    rebuilds_total: AtomicU64,
    /// Rebuilds since last report (reset on report)
    rebuilds_since_report: AtomicU64,
    rebuild_latency_sum_us: AtomicU64,
    rebuild_latency_max_us: AtomicU64,
    rebuild_latency_buckets: [AtomicU64; NUM_BUCKETS],
    ticks_coarse: AtomicU64,
    ticks_fine: AtomicU64,
    tick_failures: AtomicU64,
    events_emitted: AtomicU64,
    /// Outbound events dropped due to channel full (monotonic)
    events_dropped: AtomicU64,
    notifications_processed: AtomicU64,
    /// Point-in-time gauges, written by the engine after each mutation
    active_visitors: AtomicU64,
    active_workplaces: AtomicU64,
    day_open: AtomicBool,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            visitors_registered: AtomicU64::new(0),
            registrations_rejected: AtomicU64::new(0),
            visitors_called: AtomicU64::new(0),
            visitors_completed: AtomicU64::new(0),
            visitors_cancelled: AtomicU64::new(0),
            visitors_held_over: AtomicU64::new(0),
            visitors_moved: AtomicU64::new(0),
            holdovers_returned: AtomicU64::new(0),
            appointments_auto: AtomicU64::new(0),
            workplaces_stale: AtomicU64::new(0),
            rebuilds_total: AtomicU64::new(0),
            rebuilds_since_report: AtomicU64::new(0),
            rebuild_latency_sum_us: AtomicU64::new(0),
            rebuild_latency_max_us: AtomicU64::new(0),
            rebuild_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            ticks_coarse: AtomicU64::new(0),
            ticks_fine: AtomicU64::new(0),
            tick_failures: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            notifications_processed: AtomicU64::new(0),
            active_visitors: AtomicU64::new(0),
            active_workplaces: AtomicU64::new(0),
            day_open: AtomicBool::new(false),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_registered(&self) {
        self.visitors_registered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_registration_rejected(&self) {
        self.registrations_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_called(&self) {
        self.visitors_called.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_completed(&self) {
        self.visitors_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cancelled(&self) {
        self.visitors_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_held_over(&self) {
        self.visitors_held_over.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_moved(&self) {
        self.visitors_moved.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_holdover_returned(&self) {
        self.holdovers_returned.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_appointment_auto(&self) {
        self.appointments_auto.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_workplace_stale(&self) {
        self.workplaces_stale.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one full queue rebuild and its duration (lock-free)
    #[inline]
    pub fn record_rebuild(&self, latency_us: u64) {
        self.rebuilds_total.fetch_add(1, Ordering::Relaxed);
        self.rebuilds_since_report.fetch_add(1, Ordering::Relaxed);
        self.rebuild_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        let bucket = bucket_index(latency_us);
        self.rebuild_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.rebuild_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_tick(&self, coarse: bool) {
        if coarse {
            self.ticks_coarse.fetch_add(1, Ordering::Relaxed);
        } else {
            self.ticks_fine.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_tick_failure(&self) {
        self.tick_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_emitted(&self) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification(&self) {
        self.notifications_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish current active-set sizes
    #[inline]
    pub fn set_active(&self, visitors: usize, workplaces: usize) {
        self.active_visitors.store(visitors as u64, Ordering::Relaxed);
        self.active_workplaces.store(workplaces as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_day_open(&self, open: bool) {
        self.day_open.store(open, Ordering::Relaxed);
    }

    pub fn visitors_registered(&self) -> u64 {
        self.visitors_registered.load(Ordering::Relaxed)
    }

    pub fn registrations_rejected(&self) -> u64 {
        self.registrations_rejected.load(Ordering::Relaxed)
    }

    pub fn visitors_called(&self) -> u64 {
        self.visitors_called.load(Ordering::Relaxed)
    }

    pub fn visitors_completed(&self) -> u64 {
        self.visitors_completed.load(Ordering::Relaxed)
    }

    pub fn visitors_cancelled(&self) -> u64 {
        self.visitors_cancelled.load(Ordering::Relaxed)
    }

    pub fn visitors_held_over(&self) -> u64 {
        self.visitors_held_over.load(Ordering::Relaxed)
    }

    pub fn visitors_moved(&self) -> u64 {
        self.visitors_moved.load(Ordering::Relaxed)
    }

    pub fn holdovers_returned(&self) -> u64 {
        self.holdovers_returned.load(Ordering::Relaxed)
    }

    pub fn appointments_auto(&self) -> u64 {
        self.appointments_auto.load(Ordering::Relaxed)
    }

    pub fn workplaces_stale(&self) -> u64 {
        self.workplaces_stale.load(Ordering::Relaxed)
    }

    pub fn rebuilds_total(&self) -> u64 {
        self.rebuilds_total.load(Ordering::Relaxed)
    }

    pub fn ticks_coarse(&self) -> u64 {
        self.ticks_coarse.load(Ordering::Relaxed)
    }

    pub fn ticks_fine(&self) -> u64 {
        self.ticks_fine.load(Ordering::Relaxed)
    }

    pub fn tick_failures(&self) -> u64 {
        self.tick_failures.load(Ordering::Relaxed)
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    pub fn notifications_processed(&self) -> u64 {
        self.notifications_processed.load(Ordering::Relaxed)
    }

    pub fn active_visitors(&self) -> u64 {
        self.active_visitors.load(Ordering::Relaxed)
    }

    pub fn active_workplaces(&self) -> u64 {
        self.active_workplaces.load(Ordering::Relaxed)
    }

    pub fn day_open(&self) -> bool {
        self.day_open.load(Ordering::Relaxed)
    }

    /// Snapshot the counters and reset the periodic rebuild histogram
    pub fn report(&self) -> MetricsSummary {
        let rebuild_count = self.rebuilds_since_report.swap(0, Ordering::Relaxed);
        let rebuild_sum = self.rebuild_latency_sum_us.swap(0, Ordering::Relaxed);
        let rebuild_max = self.rebuild_latency_max_us.swap(0, Ordering::Relaxed);
        let rebuild_buckets = swap_buckets(&self.rebuild_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let rebuilds_per_sec = if elapsed.as_secs_f64() > 0.0 {
            rebuild_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let rebuild_avg_us = if rebuild_count > 0 { rebuild_sum / rebuild_count } else { 0 };

        MetricsSummary {
            visitors_registered: self.visitors_registered(),
            registrations_rejected: self.registrations_rejected(),
            visitors_called: self.visitors_called(),
            visitors_completed: self.visitors_completed(),
            visitors_cancelled: self.visitors_cancelled(),
            visitors_held_over: self.visitors_held_over(),
            visitors_moved: self.visitors_moved(),
            holdovers_returned: self.holdovers_returned(),
            appointments_auto: self.appointments_auto(),
            workplaces_stale: self.workplaces_stale(),
            rebuilds_total: self.rebuilds_total(),
            rebuilds_per_sec,
            rebuild_avg_us,
            rebuild_max_us: rebuild_max,
            rebuild_buckets,
            rebuild_p50_us: percentile_from_buckets(&rebuild_buckets, 0.50),
            rebuild_p99_us: percentile_from_buckets(&rebuild_buckets, 0.99),
            ticks_coarse: self.ticks_coarse(),
            ticks_fine: self.ticks_fine(),
            tick_failures: self.tick_failures(),
            events_emitted: self.events_emitted(),
            events_dropped: self.events_dropped(),
            notifications_processed: self.notifications_processed(),
            active_visitors: self.active_visitors(),
            active_workplaces: self.active_workplaces(),
            day_open: self.day_open(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub visitors_registered: u64,
    pub registrations_rejected: u64,
    pub visitors_called: u64,
    pub visitors_completed: u64,
    pub visitors_cancelled: u64,
    pub visitors_held_over: u64,
    pub visitors_moved: u64,
    pub holdovers_returned: u64,
    pub appointments_auto: u64,
    pub workplaces_stale: u64,
    pub rebuilds_total: u64,
    pub rebuilds_per_sec: f64,
    pub rebuild_avg_us: u64,
    pub rebuild_max_us: u64,
    /// Rebuild latency histogram since last report
    pub rebuild_buckets: [u64; NUM_BUCKETS],
    pub rebuild_p50_us: u64,
    pub rebuild_p99_us: u64,
    pub ticks_coarse: u64,
    pub ticks_fine: u64,
    pub tick_failures: u64,
    pub events_emitted: u64,
    pub events_dropped: u64,
    pub notifications_processed: u64,
    pub active_visitors: u64,
    pub active_workplaces: u64,
    pub day_open: bool,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            day_open = %self.day_open,
            active_visitors = %self.active_visitors,
            active_workplaces = %self.active_workplaces,
            registered = %self.visitors_registered,
            called = %self.visitors_called,
            completed = %self.visitors_completed,
            cancelled = %self.visitors_cancelled,
            held_over = %self.visitors_held_over,
            rebuilds_per_sec = format!("{:.2}", self.rebuilds_per_sec),
            rebuild_p99_us = %self.rebuild_p99_us,
            events_dropped = %self.events_dropped,
            tick_failures = %self.tick_failures,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.visitors_registered(), 0);
        assert_eq!(metrics.rebuilds_total(), 0);
        assert!(!metrics.day_open());
    }

    #[test]
    fn test_lifecycle_counters() {
        let metrics = Metrics::new();
        metrics.record_registered();
        metrics.record_registered();
        metrics.record_called();
        metrics.record_completed();
        metrics.record_event_dropped();
        assert_eq!(metrics.visitors_registered(), 2);
        assert_eq!(metrics.visitors_called(), 1);
        assert_eq!(metrics.visitors_completed(), 1);
        assert_eq!(metrics.events_dropped(), 1);
    }

    #[test]
    fn test_report_resets_rebuild_window() {
        let metrics = Metrics::new();
        metrics.record_rebuild(100);
        metrics.record_rebuild(200);
        metrics.record_rebuild(300);

        let summary = metrics.report();
        assert_eq!(summary.rebuilds_total, 3);
        assert_eq!(summary.rebuild_avg_us, 200);
        assert_eq!(summary.rebuild_max_us, 300);

        let again = metrics.report();
        assert_eq!(again.rebuilds_total, 3);
        assert_eq!(again.rebuild_avg_us, 0);
        assert_eq!(again.rebuild_max_us, 0);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();
        for _ in 0..100 {
            metrics.record_rebuild(150);
        }
        let summary = metrics.report();
        assert_eq!(summary.rebuild_p50_us, 200);
        assert_eq!(summary.rebuild_p99_us, 200);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..500 {
                    m.record_called();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.visitors_called(), 4000);
    }
}
