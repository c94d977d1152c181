//! Timer driver - feeds the engine its coarse and fine ticks
//!
//! The coarse tick (once a minute by default) opens and closes the day,
//! auto-calls appointment visitors and returns timed holdovers. The fine
//! tick (every second) lets free workplaces pick up appointment visitors
//! right after a queue change. Each tick takes the engine lock briefly and
//! never blocks on IO, so both run on the tokio runtime directly.

use crate::services::engine::QueueEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

pub struct TimerDriver {
    engine: Arc<QueueEngine>,
    coarse: Duration,
    fine: Duration,
}

impl TimerDriver {
    pub fn new(engine: Arc<QueueEngine>, coarse_secs: u64, fine_secs: u64) -> Self {
        Self {
            engine,
            coarse: Duration::from_secs(coarse_secs.max(1)),
            fine: Duration::from_secs(fine_secs.max(1)),
        }
    }

    /// Tick until shutdown is signalled
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut coarse = tokio::time::interval(self.coarse);
        let mut fine = tokio::time::interval(self.fine);
        coarse.set_missed_tick_behavior(MissedTickBehavior::Skip);
        fine.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            coarse_secs = %self.coarse.as_secs(),
            fine_secs = %self.fine.as_secs(),
            "timer_driver_started"
        );

        loop {
            tokio::select! {
                _ = coarse.tick() => self.engine.minute_tick(),
                _ = fine.tick() => self.engine.second_tick(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("timer_driver_stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{Config, ManualClock, Metrics};
    use crate::io::event_channel::create_event_channel;
    use crate::services::registration::LocalRegistration;
    use crate::services::repository::InMemoryRepository;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_driver_ticks_until_shutdown() {
        let config = Config::default();
        let metrics = Arc::new(Metrics::new());
        let repo = Arc::new(InMemoryRepository::from_config(&config));
        let registration = Arc::new(LocalRegistration::new(repo.clone()));
        let (events, _rx) = create_event_channel(256, "test".to_string(), metrics.clone());
        let start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(10, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let engine = Arc::new(
            QueueEngine::new(config, repo, registration, events, clock, metrics.clone()).unwrap(),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = TimerDriver::new(engine.clone(), 60, 1);
        let handle = tokio::spawn(driver.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(engine.is_day_open());
        assert_eq!(metrics.ticks_coarse(), 1);
        assert!(metrics.ticks_fine() >= 2);
    }
}
