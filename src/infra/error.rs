//! Error types surfaced by the queue engine and its collaborators

use crate::domain::{AlgorithmId, ServiceId, VisitorId, WorkplaceId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("visitor {0} not found")]
    VisitorNotFound(VisitorId),
    #[error("workplace {0} not found")]
    WorkplaceNotFound(WorkplaceId),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// No workplace can take the visitor from the walk-in queue
    #[error("live queue not allowed for service {service} under {policy} distribution")]
    LiveQueueNotAllowed { service: ServiceId, policy: &'static str },
    #[error("visitor queue limit of {limit} reached")]
    MaxVisitorsExceeded { limit: usize },
    #[error("no active workplace {workplace} runs algorithm {algorithm}")]
    NoMatchingWorkplace { algorithm: AlgorithmId, workplace: WorkplaceId },
    #[error("unknown service {0}")]
    UnknownService(ServiceId),
    #[error("unknown workplace {0}")]
    UnknownWorkplace(WorkplaceId),
    #[error("watermark encoding failed: {0}")]
    Watermark(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type EngineResult<T> = Result<T, EngineError>;
