//! Job orchestration.
//!
//! [`JobOrchestrator`] owns the table of jobs and is the only writer of job
//! state. Every mutation goes through one path that persists the new record
//! atomically before it becomes visible. Each job runs on its own task
//! driven by the runner, which sequences fetching, extraction, aggregation
//! and synthesis.

pub mod orchestrator;
pub mod progress;
mod runner;

pub use orchestrator::{JobOrchestrator, Services};

use ripper_core::{JobId, PersistenceError, Phase, ValidationError};
use thiserror::Error;

/// Orchestrator errors
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {0} is not running")]
    NotRunning(JobId),

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
