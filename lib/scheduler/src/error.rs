//! Error types for the scheduler crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ScheduleError`: Cron parsing and calendar ticks
//! - `SweepError`: The wake sweep
//! - `WorkerError`: The job worker loop

use leadflow_core::WorkflowId;
use leadflow_workflow::error::{QueueError, StoreError};
use std::fmt;

/// Errors from calendar schedules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Invalid cron expression.
    InvalidCronExpression { expression: String, reason: String },
    /// The cohort of a scheduled workflow could not be resolved.
    CohortFailed {
        workflow_id: WorkflowId,
        reason: String,
    },
    /// Scheduled workflows could not be loaded.
    Store(StoreError),
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::CohortFailed {
                workflow_id,
                reason,
            } => write!(f, "cohort for workflow {workflow_id} failed: {reason}"),
            Self::Store(err) => write!(f, "store error: {err}"),
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Errors from the wake sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepError {
    /// Due or stalled participants could not be loaded.
    Store(StoreError),
}

impl fmt::Display for SweepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(err) => write!(f, "sweep failed: {err}"),
        }
    }
}

impl std::error::Error for SweepError {}

/// Errors from the job worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Jobs could not be fetched.
    Queue(QueueError),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue(err) => write!(f, "worker failed: {err}"),
        }
    }
}

impl std::error::Error for WorkerError {}
