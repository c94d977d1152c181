//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `event_channel` - Typed channel for outbound engine events
//! - `journal` - Outbound event journal (JSONL format)
//! - `notifications` - Worker applying inbound notifications to the engine
//! - `console` - Operator line commands on stdin
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod console;
pub mod event_channel;
pub mod journal;
pub mod notifications;
pub mod prometheus;

// Re-export commonly used types
pub use console::{execute, parse_command, run_console, Command};
pub use event_channel::{create_event_channel, EventEnvelope, EventSender};
pub use journal::Journal;
pub use notifications::{create_notification_worker, NotificationWorker};
