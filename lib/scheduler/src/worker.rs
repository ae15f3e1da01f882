//! The job worker.
//!
//! Pulls due execution jobs, runs one `execute_step` per job and
//! acknowledges it. Retryable failures are queued again with exponential
//! backoff until the attempt budget is spent.

use crate::error::WorkerError;
use chrono::Duration;
use futures::{StreamExt, stream};
use leadflow_workflow::clock::Clock;
use leadflow_workflow::executor::NodeExecutor;
use leadflow_workflow::queue::{Delivery, JobQueue};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::instrument;

/// Backoff for retryable step failures.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per job, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt that follows failed attempt `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let millis = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::milliseconds(i64::try_from(millis).unwrap_or(i64::MAX))
    }

    #[must_use]
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Configuration for the job worker.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Jobs fetched per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Jobs executed at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_batch_size() -> usize {
    32
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_concurrency() -> usize {
    8
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            concurrency: default_concurrency(),
        }
    }
}

/// Executes queued jobs.
pub struct JobWorker {
    queue: Arc<dyn JobQueue>,
    executor: NodeExecutor,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    config: WorkerConfig,
}

impl JobWorker {
    #[must_use]
    pub fn new(
        queue: Arc<dyn JobQueue>,
        executor: NodeExecutor,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            executor,
            clock,
            policy,
            config,
        }
    }

    /// Fetches one batch of due jobs and processes it. Returns the number
    /// of jobs fetched.
    ///
    /// # Errors
    ///
    /// Fails if the queue cannot be read.
    pub async fn run_once(&self) -> leadflow_core::Result<usize, WorkerError> {
        let deliveries = self
            .queue
            .fetch(self.config.batch_size)
            .await
            .map_err(WorkerError::Queue)?;
        let fetched = deliveries.len();

        stream::iter(deliveries)
            .for_each_concurrent(self.config.concurrency.max(1), |delivery| self.process(delivery))
            .await;
        Ok(fetched)
    }

    #[instrument(skip_all, fields(
        job_id = %delivery.job.payload.id,
        participant_id = %delivery.job.payload.participant_id,
        attempt = delivery.job.payload.attempt,
    ))]
    async fn process(&self, delivery: Delivery) {
        let job = delivery.job.payload.clone();

        match self.executor.execute_step(job.participant_id).await {
            Ok(outcome) => {
                tracing::debug!(reason = %job.reason, ?outcome, "job executed");
            }
            Err(err) if err.is_retryable() && self.policy.allows_retry(job.attempt) => {
                let delay = self.policy.delay_for(job.attempt);
                let retry = job.retry(self.clock.now() + delay);
                if let Err(queue_err) = self.queue.enqueue(retry).await {
                    // left unacknowledged so the queue redelivers it
                    tracing::warn!(error = %err, queue_error = %queue_err, "failed to queue retry");
                    return;
                }
                tracing::warn!(error = %err, delay_ms = delay.num_milliseconds(), "step failed, retry queued");
            }
            Err(err) if err.is_retryable() => {
                tracing::error!(error = %err, "retry budget exhausted, dropping job");
            }
            Err(err) => {
                tracing::error!(error = %err, "step failed, dropping job");
            }
        }

        if let Err(err) = delivery.ack().await {
            tracing::warn!(error = %err, "failed to acknowledge job");
        }
    }

    /// Polls the queue until `shutdown` flips. A full batch is followed
    /// immediately by another poll.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = std::time::Duration::from_millis(self.config.poll_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        tracing::info!("job worker started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => loop {
                    match self.run_once().await {
                        Ok(fetched) if fetched >= self.config.batch_size => {}
                        Ok(_) => break,
                        Err(err) => {
                            tracing::warn!(error = %err, "job worker poll failed");
                            break;
                        }
                    }
                },
            }
        }
        tracing::info!("job worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, chain, start};
    use async_trait::async_trait;
    use leadflow_workflow::error::QueueError;
    use leadflow_workflow::executor::ExecutorConfig;
    use leadflow_workflow::node::{Node, NodeId, NodeKind, TagConfig};
    use leadflow_workflow::participant::ParticipantStatus;
    use leadflow_workflow::queue::{ExecutionJob, JobReason};
    use leadflow_workflow::trigger::DomainEvent;

    struct BrokenQueue;

    #[async_trait]
    impl JobQueue for BrokenQueue {
        async fn enqueue(&self, _job: ExecutionJob) -> Result<(), QueueError> {
            Err(QueueError::Enqueue {
                reason: "down".to_string(),
            })
        }

        async fn fetch(&self, _max: usize) -> Result<Vec<Delivery>, QueueError> {
            Ok(Vec::new())
        }
    }

    fn two_tags() -> leadflow_workflow::definition::Workflow {
        let tag = |id: &str| {
            Node::new(
                id,
                "Tag",
                NodeKind::AddTag(TagConfig {
                    tag: id.to_string(),
                }),
            )
        };
        chain(vec![tag("a"), tag("b")])
    }

    /// An executor that stops after one node and cannot queue the
    /// continuation, so every step ends in a retryable error.
    fn stalling_executor(harness: &Harness) -> NodeExecutor {
        harness.executor_with(
            ExecutorConfig {
                step_limit: 1,
                ..ExecutorConfig::default()
            },
            Arc::new(BrokenQueue),
        )
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::seconds(1));
        assert_eq!(policy.delay_for(2), Duration::seconds(2));
        assert_eq!(policy.delay_for(4), Duration::seconds(8));
        assert_eq!(policy.delay_for(7), Duration::seconds(60));
        assert_eq!(policy.delay_for(40), Duration::seconds(60));
        assert!(policy.allows_retry(4));
        assert!(!policy.allows_retry(5));
    }

    #[tokio::test]
    async fn runs_enrolled_job_and_acks() {
        let harness = Harness::new();
        let wf = harness.publish(two_tags()).await;
        let report = harness
            .dispatcher()
            .dispatch(&DomainEvent::manual(wf.id, "lead-1"))
            .await;
        let (_, participant_id) = report.enrolled[0];

        assert_eq!(harness.worker().run_once().await.expect("run"), 1);
        assert!(harness.queue.pending().await.is_empty());
        let participant = harness.participant(participant_id).await;
        assert_eq!(participant.status, ParticipantStatus::Completed);
    }

    #[tokio::test]
    async fn retryable_failure_is_requeued_with_backoff() {
        let harness = Harness::new();
        let wf = harness.publish(two_tags()).await;
        let report = harness
            .dispatcher()
            .dispatch(&DomainEvent::manual(wf.id, "lead-1"))
            .await;
        let (_, participant_id) = report.enrolled[0];

        let worker = harness.worker_with(stalling_executor(&harness));
        worker.run_once().await.expect("run");

        let pending = harness.queue.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].participant_id, participant_id);
        assert_eq!(pending[0].reason, JobReason::Retry);
        assert_eq!(pending[0].attempt, 2);
        assert_eq!(pending[0].not_before, start() + Duration::seconds(1));

        // not due until the backoff passes
        assert_eq!(worker.run_once().await.expect("run"), 0);

        // progress made before the failure is kept
        let participant = harness.participant(participant_id).await;
        assert_eq!(participant.current_node_id, Some(NodeId::new("b")));
    }

    #[tokio::test]
    async fn exhausted_retries_are_dropped() {
        let harness = Harness::new();
        let wf = harness.publish(two_tags()).await;
        let report = harness
            .dispatcher()
            .dispatch(&DomainEvent::manual(wf.id, "lead-1"))
            .await;
        let (_, participant_id) = report.enrolled[0];

        // replace the first job with its final attempt
        harness.queue.fetch(10).await.expect("fetch");
        let mut last = ExecutionJob::new(participant_id, JobReason::Retry, start());
        last.attempt = RetryPolicy::default().max_attempts;
        harness.queue.enqueue(last).await.expect("enqueue");

        let worker = harness.worker_with(stalling_executor(&harness));
        assert_eq!(worker.run_once().await.expect("run"), 1);
        assert!(harness.queue.pending().await.is_empty());
    }

    #[tokio::test]
    async fn missing_participant_is_dropped() {
        let harness = Harness::new();
        harness
            .queue
            .enqueue(ExecutionJob::new(
                leadflow_core::ParticipantId::new(),
                JobReason::Enrolled,
                start(),
            ))
            .await
            .expect("enqueue");

        assert_eq!(harness.worker().run_once().await.expect("run"), 1);
        assert!(harness.queue.pending().await.is_empty());
    }
}
