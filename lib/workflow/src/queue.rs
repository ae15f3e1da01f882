//! Execution job queue.
//!
//! Enrollment and the wake sweep hand participants to the executor through
//! this queue instead of running them inline. Delivery is at-least-once: a
//! job is removed only when acknowledged, so the executor must tolerate
//! running the same step twice.

use crate::clock::Clock;
use crate::envelope::Envelope;
use crate::error::QueueError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadflow_core::{JobId, ParticipantId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Why a job was enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobReason {
    /// First step after enrollment.
    Enrolled,
    /// The previous invocation hit the step limit.
    Continuation,
    /// Woken by the sweep.
    Resumed,
    /// A previous attempt failed with a retryable error.
    Retry,
    /// Re-enqueued after being found stalled.
    Recovered,
}

impl fmt::Display for JobReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Enrolled => "enrolled",
            Self::Continuation => "continuation",
            Self::Resumed => "resumed",
            Self::Retry => "retry",
            Self::Recovered => "recovered",
        })
    }
}

/// Request to run `execute_step` for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionJob {
    pub id: JobId,
    pub participant_id: ParticipantId,
    pub reason: JobReason,
    /// 1 for the first attempt.
    pub attempt: u32,
    /// The job is not delivered before this time.
    pub not_before: DateTime<Utc>,
}

impl ExecutionJob {
    #[must_use]
    pub fn new(participant_id: ParticipantId, reason: JobReason, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            participant_id,
            reason,
            attempt: 1,
            not_before: now,
        }
    }

    /// Builds the follow-up attempt after a retryable failure.
    #[must_use]
    pub fn retry(&self, not_before: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            participant_id: self.participant_id,
            reason: JobReason::Retry,
            attempt: self.attempt + 1,
            not_before,
        }
    }

    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now
    }
}

/// Acknowledges one delivered job.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), QueueError>;
}

/// A job handed to a worker. Unacknowledged deliveries are redelivered.
pub struct Delivery {
    pub job: Envelope<ExecutionJob>,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    #[must_use]
    pub fn new(job: Envelope<ExecutionJob>, acker: Box<dyn Acknowledge>) -> Self {
        Self { job, acker }
    }

    /// Removes the job from the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue rejects the acknowledgement.
    pub async fn ack(self) -> Result<ExecutionJob, QueueError> {
        self.acker.ack().await?;
        Ok(self.job.into_payload())
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery").field("job", &self.job).finish_non_exhaustive()
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: ExecutionJob) -> Result<(), QueueError>;

    /// Fetches up to `max` jobs that are due.
    async fn fetch(&self, max: usize) -> Result<Vec<Delivery>, QueueError>;
}

struct NoopAck;

#[async_trait]
impl Acknowledge for NoopAck {
    async fn ack(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Delayed job queue held in process memory.
///
/// Fetching removes the job, so work is lost if the process stops.
#[derive(Clone)]
pub struct InMemoryJobQueue {
    jobs: Arc<Mutex<VecDeque<Envelope<ExecutionJob>>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryJobQueue {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(VecDeque::new())),
            clock,
        }
    }

    /// Jobs not yet fetched, in enqueue order.
    pub async fn pending(&self) -> Vec<ExecutionJob> {
        self.jobs
            .lock()
            .await
            .iter()
            .map(|envelope| envelope.payload.clone())
            .collect()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: ExecutionJob) -> Result<(), QueueError> {
        self.jobs.lock().await.push_back(Envelope::new(job));
        Ok(())
    }

    async fn fetch(&self, max: usize) -> Result<Vec<Delivery>, QueueError> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock().await;
        let mut delivered = Vec::new();
        let mut remaining = VecDeque::with_capacity(jobs.len());

        while let Some(envelope) = jobs.pop_front() {
            if delivered.len() < max && envelope.payload.is_due(now) {
                delivered.push(Delivery::new(envelope, Box::new(NoopAck)));
            } else {
                remaining.push_back(envelope);
            }
        }
        *jobs = remaining;
        Ok(delivered)
    }
}
