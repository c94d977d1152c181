//! Inbound notification worker
//!
//! Schedule, algorithm, workplace, SMS and booking changes arrive from the
//! rest of the system on an mpsc channel. The worker applies them to the
//! engine one at a time, so a notification never races a timer tick for
//! the engine lock out of order with its predecessors.

use crate::domain::Notification;
use crate::services::engine::QueueEngine;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Worker that applies notifications to the engine
pub struct NotificationWorker {
    engine: Arc<QueueEngine>,
    rx: mpsc::Receiver<Notification>,
}

impl NotificationWorker {
    pub fn new(engine: Arc<QueueEngine>, rx: mpsc::Receiver<Notification>) -> Self {
        Self { engine, rx }
    }

    /// Run until the channel closes or shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("notification_worker_started");
        loop {
            tokio::select! {
                maybe = self.rx.recv() => {
                    let Some(notification) = maybe else { break };
                    self.apply(notification);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("notification_worker_stopped");
    }

    fn apply(&self, notification: Notification) {
        let kind = notification.kind();
        let start = Instant::now();
        match self.engine.handle(notification) {
            Ok(()) => info!(
                kind = %kind,
                latency_us = %start.elapsed().as_micros(),
                "notification_applied"
            ),
            Err(e) => warn!(kind = %kind, error = %e, "notification_failed"),
        }
    }
}

/// Create a notification channel and its worker
///
/// Returns the sender (for producers) and the worker (to be spawned)
pub fn create_notification_worker(
    engine: Arc<QueueEngine>,
    buffer_size: usize,
) -> (mpsc::Sender<Notification>, NotificationWorker) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    (tx, NotificationWorker::new(engine, rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Algorithm, AlgorithmId, CandidateKind};
    use crate::infra::{Config, ManualClock, Metrics};
    use crate::io::event_channel::create_event_channel;
    use crate::services::registration::LocalRegistration;
    use crate::services::repository::InMemoryRepository;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_worker_applies_until_channel_closes() {
        let config = Config::default();
        let metrics = Arc::new(Metrics::new());
        let repo = Arc::new(InMemoryRepository::from_config(&config));
        let registration = Arc::new(LocalRegistration::new(repo.clone()));
        let (events, _events_rx) = create_event_channel(256, "test".to_string(), metrics.clone());
        let start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(10, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let engine = Arc::new(
            QueueEngine::new(config, repo, registration, events, clock, metrics.clone()).unwrap(),
        );

        let (tx, worker) = create_notification_worker(engine, 8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        for _ in 0..2 {
            let algorithm = Algorithm::new(AlgorithmId(1), "free first")
                .with_priority(vec![CandidateKind::Free]);
            tx.send(Notification::AlgorithmChanged { algorithm, workplace: None }).await.unwrap();
        }
        drop(tx);

        worker.run(shutdown_rx).await;
        assert_eq!(metrics.notifications_processed(), 2);
    }
}
