//! Scheduler error types.

use sealgrid_core::{Cancelled, WorkerId};
use thiserror::Error;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("worker not found: {0}")]
    WorkerNotFound(WorkerId),

    #[error("worker already registered: {0}")]
    AlreadyRegistered(WorkerId),

    #[error("no registered worker can ever fit the request")]
    NoCapableWorker,

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
