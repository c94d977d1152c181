//! Infrastructure - configuration, clock, errors, and metrics
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `clock` - Wall-clock abstraction (system or manually driven)
//! - `error` - Engine and repository error types
//! - `metrics` - Lock-free metrics collection

pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{EngineError, EngineResult, RepositoryError};
pub use metrics::Metrics;
