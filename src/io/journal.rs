//! Event journal - appends outbound events to a file
//!
//! Events are written in JSONL format (one JSON object per line)
//! to the file specified in config.

use crate::domain::OutboundEvent;
use crate::io::event_channel::EventEnvelope;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

/// Journal writer for outbound events
pub struct Journal {
    file_path: String,
}

impl Journal {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "journal_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Write one event to the journal file
    /// Returns true if successful, false otherwise
    pub fn write_event(&self, envelope: &EventEnvelope) -> bool {
        let json = match serde_json::to_string(envelope) {
            Ok(json) => json,
            Err(e) => {
                error!(id = %envelope.id, error = %e, "journal_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => true,
            Err(e) => {
                error!(id = %envelope.id, error = %e, "journal_write_failed");
                false
            }
        }
    }

    /// Append a line to the journal file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "journal_written");

        Ok(())
    }

    /// Consume the outbound channel until it closes or shutdown is signalled
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<EventEnvelope>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    let Some(envelope) = maybe else { break };
                    log_display_event(&envelope);
                    self.write_event(&envelope);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        // Drain what is already queued
                        while let Ok(envelope) = rx.try_recv() {
                            self.write_event(&envelope);
                        }
                        break;
                    }
                }
            }
        }
        info!(file = %self.file_path, "journal_stopped");
    }
}

fn log_display_event(envelope: &EventEnvelope) {
    match &envelope.event {
        OutboundEvent::OpenDay { on_startup } => info!(on_startup = %on_startup, "display_day_open"),
        OutboundEvent::CloseDay => info!("display_day_closed"),
        OutboundEvent::Visitor(ev) if ev.is_rebuild_all() => debug!("display_rebuild_all"),
        OutboundEvent::Visitor(ev) => debug!(
            workplace = ?ev.workplace,
            visitor = ?ev.visitor,
            text = %ev.text,
            "display_update"
        ),
    }
}
