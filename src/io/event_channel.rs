//! Typed channel for outbound engine events
//!
//! Provides a non-blocking way for the engine to publish events while it
//! holds its write lock. Uses a bounded mpsc channel; when it is full the
//! event is dropped and counted rather than blocking the lock holder.

use crate::domain::OutboundEvent;
use crate::infra::Metrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::warn;

/// Current time in epoch milliseconds
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Outbound event stamped for downstream consumers
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique, time-ordered event id (UUIDv7)
    pub id: String,
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    #[serde(flatten)]
    pub event: OutboundEvent,
}

/// Sender handle for outbound events
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, events are dropped.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<EventEnvelope>,
    site_id: String,
    metrics: Arc<Metrics>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<EventEnvelope>, site_id: String, metrics: Arc<Metrics>) -> Self {
        Self { tx, site_id, metrics }
    }

    /// Stamp and enqueue an event without blocking
    pub fn send(&self, event: OutboundEvent) {
        let kind = event.kind();
        let envelope = EventEnvelope {
            id: uuid::Uuid::now_v7().to_string(),
            site: self.site_id.clone(),
            ts: epoch_ms(),
            event,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => self.metrics.record_event_emitted(),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.record_event_dropped();
                warn!(kind = %kind, "event_dropped_channel_full");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.record_event_dropped();
            }
        }
    }
}

/// Create a new outbound event channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// site_id is stamped into every envelope for downstream consumers.
pub fn create_event_channel(
    buffer_size: usize,
    site_id: String,
    metrics: Arc<Metrics>,
) -> (EventSender, mpsc::Receiver<EventEnvelope>) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    (EventSender::new(tx, site_id, metrics), rx)
}
