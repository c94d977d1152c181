//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `engine` - Queue engine: distribution, visitor and day lifecycle
//! - `queue` - Per-workplace ordering policy
//! - `repository` - Persistence collaborator and its in-memory implementation
//! - `registration` - Ticket issuing and appointment housekeeping
//! - `timer` - Coarse and fine timer driver

pub mod engine;
pub mod queue;
pub mod registration;
pub mod repository;
pub mod timer;

// Re-export commonly used types
pub use engine::{QueueEngine, WorkplaceView};
pub use queue::{CandidateLists, PriorityQueue, QueueParams, QueuePolicy};
pub use registration::{LocalRegistration, Registration};
pub use repository::{InMemoryRepository, OperationRecord, Repository, Setting};
pub use timer::TimerDriver;
